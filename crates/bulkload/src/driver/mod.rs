//! Database driver abstraction
//!
//! A [`Driver`] opens [`Connection`]s. A connection offers explicit
//! transaction control, metadata lookup, and the vendor bulk-load (COPY)
//! channel operations. The orchestrator only talks to these traits; the
//! shipped implementation is [`PgDriver`] for PostgreSQL-wire databases.
//!
//! Drivers are used through a [`DriverSession`] acquired from a
//! [`DriverRegistry`], which scopes registration to a single run.

use crate::config::Credentials;
use crate::error::DriverResult;
use crate::storage::ByteStream;
use async_trait::async_trait;

pub mod postgres;
pub mod registry;

pub use postgres::{PgBulkConnection, PgDriver};
pub use registry::{DriverRegistry, DriverSession};

/// Factory for database connections
#[async_trait]
pub trait Driver: Send + Sync {
    /// Registration key; sessions of the same name share one registration.
    fn name(&self) -> &str;

    /// Called when the first session for this driver name is acquired.
    fn on_register(&self) {}

    /// Called when the last session for this driver name is released.
    fn on_deregister(&self) {}

    /// Open a connection. Without credentials the connection string alone
    /// is used.
    async fn connect(
        &self,
        connection_string: &str,
        credentials: Option<&Credentials>,
    ) -> DriverResult<Box<dyn Connection>>;
}

/// One open database connection with its bulk-load channel
///
/// The `copy_*` methods are the raw vendor protocol. They are normally driven
/// through [`crate::channel::BulkLoadChannel`], which enforces call order.
#[async_trait]
pub trait Connection: Send {
    /// Whether the metadata catalog knows `table` (optionally `schema.table`).
    async fn table_exists(&mut self, table: &str) -> DriverResult<bool>;

    /// With auto-commit off, work stays in an open transaction until
    /// [`Connection::commit`].
    async fn set_auto_commit(&mut self, enabled: bool) -> DriverResult<()>;

    /// Commit the open transaction. A commit with nothing pending is a no-op.
    async fn commit(&mut self) -> DriverResult<()>;

    /// Open the COPY channel for `statement`.
    async fn copy_start(&mut self, statement: &str) -> DriverResult<()>;

    /// Queue a stream for the next execution.
    async fn copy_add_stream(&mut self, stream: ByteStream) -> DriverResult<()>;

    /// Load every queued stream; returns the row numbers the database rejected.
    async fn copy_execute(&mut self) -> DriverResult<Vec<u64>>;

    /// Close the COPY channel; returns the rows inserted since `copy_start`.
    async fn copy_finish(&mut self) -> DriverResult<u64>;

    /// Drop the COPY channel without finishing it.
    async fn copy_abort(&mut self) -> DriverResult<()>;

    /// Close the connection. Uncommitted work is left to the database.
    async fn close(self: Box<Self>) -> DriverResult<()>;
}
