//! Ordered access to a connection's copy channel
//!
//! The vendor protocol only makes sense in one order: start, then any number
//! of add-stream/execute rounds, then finish. [`BulkLoadChannel`] tracks where
//! a load is in that sequence and refuses out-of-order calls with
//! [`DriverError::InvalidState`] instead of passing them to the database.

use crate::driver::Connection;
use crate::error::{DriverError, DriverResult};
use crate::storage::ByteStream;

/// Position of a channel in the copy protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Created,
    Started,
    /// At least one stream is queued and not yet executed
    Feeding,
    Executed,
    Finished,
    Aborted,
}

impl ChannelState {
    fn describe(self) -> &'static str {
        match self {
            ChannelState::Created => "not started",
            ChannelState::Started => "started",
            ChannelState::Feeding => "streams are queued",
            ChannelState::Executed => "executed",
            ChannelState::Finished => "finished",
            ChannelState::Aborted => "aborted",
        }
    }
}

/// A copy channel bound to one statement on one connection
pub struct BulkLoadChannel<'c> {
    connection: &'c mut dyn Connection,
    statement: String,
    state: ChannelState,
}

impl<'c> BulkLoadChannel<'c> {
    pub fn new(connection: &'c mut dyn Connection, statement: impl Into<String>) -> Self {
        Self {
            connection,
            statement: statement.into(),
            state: ChannelState::Created,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn statement(&self) -> &str {
        &self.statement
    }

    /// Started and not yet finished or aborted.
    pub fn is_open(&self) -> bool {
        matches!(
            self.state,
            ChannelState::Started | ChannelState::Feeding | ChannelState::Executed
        )
    }

    fn invalid(&self, operation: &'static str) -> DriverError {
        DriverError::InvalidState {
            operation,
            state: self.state.describe(),
        }
    }

    pub async fn start(&mut self) -> DriverResult<()> {
        if self.state != ChannelState::Created {
            return Err(self.invalid("start"));
        }
        self.connection.copy_start(&self.statement).await?;
        self.state = ChannelState::Started;
        Ok(())
    }

    pub async fn add_stream(&mut self, stream: ByteStream) -> DriverResult<()> {
        if !self.is_open() {
            return Err(self.invalid("add a stream"));
        }
        self.connection.copy_add_stream(stream).await?;
        self.state = ChannelState::Feeding;
        Ok(())
    }

    /// Load the queued streams; returns the rejected row numbers.
    pub async fn execute(&mut self) -> DriverResult<Vec<u64>> {
        if self.state != ChannelState::Feeding {
            return Err(self.invalid("execute"));
        }
        let rejects = self.connection.copy_execute().await?;
        self.state = ChannelState::Executed;
        Ok(rejects)
    }

    /// Close the channel; returns the rows inserted over its lifetime.
    pub async fn finish(&mut self) -> DriverResult<u64> {
        if !self.is_open() {
            return Err(self.invalid("finish"));
        }
        let inserted = self.connection.copy_finish().await?;
        self.state = ChannelState::Finished;
        Ok(inserted)
    }

    /// Abort an open channel. Does nothing once finished or aborted.
    pub async fn abort(&mut self) -> DriverResult<()> {
        if !self.is_open() {
            return Ok(());
        }
        self.state = ChannelState::Aborted;
        self.connection.copy_abort().await
    }

    /// Commit the connection's open transaction.
    pub async fn commit(&mut self) -> DriverResult<()> {
        self.connection.commit().await
    }
}
