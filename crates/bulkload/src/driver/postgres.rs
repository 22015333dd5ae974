//! PostgreSQL-wire driver built on sqlx
//!
//! Maps the channel protocol onto `COPY ... FROM STDIN`. PostgreSQL cannot
//! keep one COPY open across a commit, so every [`Connection::copy_execute`]
//! runs its own COPY over the streams queued since the previous execution and
//! the channel sums the rows each COPY reports. The server aborts a COPY on
//! the first malformed row rather than rejecting rows individually, so the
//! reject list is always empty.

use super::{Connection, Driver};
use crate::config::{redact_connection_string, Credentials};
use crate::error::{DriverError, DriverResult};
use crate::storage::ByteStream;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Connection as SqlxConnection};
use std::str::FromStr;
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument};

/// Bytes read from an input stream per COPY data message.
const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Driver for PostgreSQL and databases speaking its wire protocol
#[derive(Debug, Default, Clone)]
pub struct PgDriver;

impl PgDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Driver for PgDriver {
    fn name(&self) -> &str {
        "postgres"
    }

    #[instrument(skip(self, connection_string, credentials), fields(target = %redact_connection_string(connection_string)))]
    async fn connect(
        &self,
        connection_string: &str,
        credentials: Option<&Credentials>,
    ) -> DriverResult<Box<dyn Connection>> {
        let mut options = PgConnectOptions::from_str(connection_string).map_err(|e| {
            DriverError::InvalidTarget {
                target: redact_connection_string(connection_string),
                reason: e.to_string(),
            }
        })?;

        if let Some(credentials) = credentials {
            options = options.username(&credentials.user);
            if let Some(password) = &credentials.password {
                options = options.password(password);
            }
        }

        let conn = options.connect().await?;
        debug!("connected");
        Ok(Box::new(PgBulkConnection::new(conn)))
    }
}

/// A sqlx connection plus the state of its copy channel
pub struct PgBulkConnection {
    conn: PgConnection,
    auto_commit: bool,
    in_transaction: bool,
    statement: Option<String>,
    pending: Vec<ByteStream>,
    inserted: u64,
}

impl PgBulkConnection {
    pub fn new(conn: PgConnection) -> Self {
        Self {
            conn,
            auto_commit: true,
            in_transaction: false,
            statement: None,
            pending: Vec::new(),
            inserted: 0,
        }
    }

    fn open_statement(&self, operation: &'static str) -> DriverResult<String> {
        self.statement.clone().ok_or(DriverError::InvalidState {
            operation,
            state: "no copy is open",
        })
    }

    async fn begin_if_needed(&mut self) -> DriverResult<()> {
        if !self.auto_commit && !self.in_transaction {
            sqlx::query("BEGIN").execute(&mut self.conn).await?;
            self.in_transaction = true;
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for PgBulkConnection {
    async fn table_exists(&mut self, table: &str) -> DriverResult<bool> {
        let (schema, name) = match table.split_once('.') {
            Some((schema, name)) => (Some(schema), name),
            None => (None, table),
        };

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
             WHERE table_name = $1 AND ($2::text IS NULL OR table_schema = $2))",
        )
        .bind(name)
        .bind(schema)
        .fetch_one(&mut self.conn)
        .await?;

        Ok(exists)
    }

    async fn set_auto_commit(&mut self, enabled: bool) -> DriverResult<()> {
        if enabled && self.in_transaction {
            self.commit().await?;
        }
        self.auto_commit = enabled;
        Ok(())
    }

    async fn commit(&mut self) -> DriverResult<()> {
        if self.in_transaction {
            sqlx::query("COMMIT").execute(&mut self.conn).await?;
            self.in_transaction = false;
            debug!("committed");
        }
        Ok(())
    }

    async fn copy_start(&mut self, statement: &str) -> DriverResult<()> {
        if self.statement.is_some() {
            return Err(DriverError::InvalidState {
                operation: "start",
                state: "a copy is already open",
            });
        }
        self.statement = Some(statement.to_string());
        self.inserted = 0;
        Ok(())
    }

    async fn copy_add_stream(&mut self, stream: ByteStream) -> DriverResult<()> {
        self.open_statement("add a stream")?;
        self.pending.push(stream);
        Ok(())
    }

    async fn copy_execute(&mut self) -> DriverResult<Vec<u64>> {
        let statement = self.open_statement("execute")?;
        self.begin_if_needed().await?;

        let streams = std::mem::take(&mut self.pending);
        let mut copy = self.conn.copy_in_raw(&statement).await?;
        let mut buf = vec![0u8; COPY_CHUNK_SIZE];

        for mut stream in streams {
            loop {
                let n = match stream.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        // the server discards everything sent by this COPY
                        if let Err(abort_error) = copy.abort(e.to_string()).await {
                            debug!(error = %abort_error, "copy abort reported an error");
                        }
                        return Err(e.into());
                    }
                };
                copy.send(&buf[..n]).await?;
            }
        }

        let rows = copy.finish().await?;
        self.inserted += rows;
        debug!(rows, total = self.inserted, "copy executed");
        Ok(Vec::new())
    }

    async fn copy_finish(&mut self) -> DriverResult<u64> {
        self.open_statement("finish")?;
        if !self.pending.is_empty() {
            self.copy_execute().await?;
        }
        self.statement = None;
        Ok(std::mem::take(&mut self.inserted))
    }

    async fn copy_abort(&mut self) -> DriverResult<()> {
        self.pending.clear();
        self.statement = None;
        self.inserted = 0;
        Ok(())
    }

    async fn close(self: Box<Self>) -> DriverResult<()> {
        if self.in_transaction {
            debug!("closing with an open transaction, uncommitted rows are discarded");
        }
        self.conn.close().await?;
        Ok(())
    }
}
