//! Shared fixtures for bulkload integration tests
//!
//! - [`SpyDriver`] records every driver, connection and channel call and
//!   replays scripted outcomes (reject lists, finish count, failures)
//! - [`MemoryStore`] serves input files from memory
//! - [`RecordingMetrics`] keeps reported gauges for assertions
//! - [`TestPostgres`] starts a PostgreSQL container for the sqlx adapter tests

#![allow(dead_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use bulkload::config::Credentials;
use bulkload::error::{DriverError, DriverResult, StorageError, StorageResult};
use bulkload::storage::ByteStream;
use bulkload::{Connection, Driver, DriverRegistry, FileHandle, FileStore, LoadContext, MetricsSink};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::io::AsyncReadExt;

// ============================================================================
// Spy driver
// ============================================================================

/// One observed call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Register,
    Deregister,
    Connect,
    TableExists(String),
    SetAutoCommit(bool),
    Start(String),
    /// Contents of the stream that was added
    AddStream(String),
    Execute,
    Finish,
    Abort,
    Commit,
    Close,
}

/// Scripted behaviour of a [`SpyDriver`]
#[derive(Debug, Clone)]
pub struct Script {
    pub table_present: bool,
    pub connect_fails: bool,
    /// Reject list returned by the n-th execute; empty once exhausted
    pub rejects: Vec<Vec<u64>>,
    pub finish_rows: u64,
    /// Zero based index of the execute call that fails
    pub fail_execute_at: Option<usize>,
    pub fail_table_lookup: bool,
    pub fail_finish: bool,
    pub fail_commit: bool,
    pub fail_close: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            table_present: true,
            connect_fails: false,
            rejects: Vec::new(),
            finish_rows: 0,
            fail_execute_at: None,
            fail_table_lookup: false,
            fail_finish: false,
            fail_commit: false,
            fail_close: false,
        }
    }
}

pub struct SpyDriver {
    script: Script,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl SpyDriver {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    /// Calls made on the copy channel, in order.
    pub fn channel_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| {
                matches!(
                    c,
                    Call::Start(_) | Call::AddStream(_) | Call::Execute | Call::Finish | Call::Abort
                )
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Driver for SpyDriver {
    fn name(&self) -> &str {
        "spy"
    }

    fn on_register(&self) {
        self.record(Call::Register);
    }

    fn on_deregister(&self) {
        self.record(Call::Deregister);
    }

    async fn connect(
        &self,
        _connection_string: &str,
        _credentials: Option<&Credentials>,
    ) -> DriverResult<Box<dyn Connection>> {
        self.record(Call::Connect);
        if self.script.connect_fails {
            return Err(DriverError::other("connection refused"));
        }
        Ok(Box::new(SpyConnection {
            script: self.script.clone(),
            calls: Arc::clone(&self.calls),
            executes: 0,
        }))
    }
}

struct SpyConnection {
    script: Script,
    calls: Arc<Mutex<Vec<Call>>>,
    executes: usize,
}

impl SpyConnection {
    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Connection for SpyConnection {
    async fn table_exists(&mut self, table: &str) -> DriverResult<bool> {
        self.record(Call::TableExists(table.to_string()));
        if self.script.fail_table_lookup {
            return Err(DriverError::other("permission denied for schema information_schema"));
        }
        Ok(self.script.table_present)
    }

    async fn set_auto_commit(&mut self, enabled: bool) -> DriverResult<()> {
        self.record(Call::SetAutoCommit(enabled));
        Ok(())
    }

    async fn commit(&mut self) -> DriverResult<()> {
        self.record(Call::Commit);
        if self.script.fail_commit {
            return Err(DriverError::other("could not serialize access"));
        }
        Ok(())
    }

    async fn copy_start(&mut self, statement: &str) -> DriverResult<()> {
        self.record(Call::Start(statement.to_string()));
        Ok(())
    }

    async fn copy_add_stream(&mut self, mut stream: ByteStream) -> DriverResult<()> {
        let mut contents = String::new();
        stream.read_to_string(&mut contents).await?;
        self.record(Call::AddStream(contents));
        Ok(())
    }

    async fn copy_execute(&mut self) -> DriverResult<Vec<u64>> {
        self.record(Call::Execute);
        let index = self.executes;
        self.executes += 1;

        if self.script.fail_execute_at == Some(index) {
            return Err(DriverError::other("stream reset by peer"));
        }
        Ok(self.script.rejects.get(index).cloned().unwrap_or_default())
    }

    async fn copy_finish(&mut self) -> DriverResult<u64> {
        self.record(Call::Finish);
        if self.script.fail_finish {
            return Err(DriverError::other("copy terminated by server"));
        }
        Ok(self.script.finish_rows)
    }

    async fn copy_abort(&mut self) -> DriverResult<()> {
        self.record(Call::Abort);
        Ok(())
    }

    async fn close(self: Box<Self>) -> DriverResult<()> {
        self.record(Call::Close);
        if self.script.fail_close {
            return Err(DriverError::other("socket already closed"));
        }
        Ok(())
    }
}

// ============================================================================
// In-memory file store
// ============================================================================

/// Directories of named files held in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    dirs: BTreeMap<String, Vec<(String, String)>>,
    unreadable: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dir(mut self, path: &str, files: &[(&str, &str)]) -> Self {
        self.dirs.insert(
            path.to_string(),
            files
                .iter()
                .map(|(name, body)| (name.to_string(), body.to_string()))
                .collect(),
        );
        self
    }

    /// Make `name` fail when opened.
    pub fn with_unreadable(mut self, name: &str) -> Self {
        self.unreadable = Some(name.to_string());
        self
    }
}

#[async_trait]
impl FileStore for MemoryStore {
    async fn list_entries(&self, path: &str) -> StorageResult<Vec<FileHandle>> {
        let files = self
            .dirs
            .get(path)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;

        let mut handles: Vec<_> = files
            .iter()
            .map(|(name, body)| {
                FileHandle::new(format!("{}/{}", path, name), name.clone(), Some(body.len() as u64))
            })
            .collect();
        handles.sort_by(|a, b| a.location().cmp(b.location()));
        Ok(handles)
    }

    async fn open_read(&self, file: &FileHandle) -> StorageResult<ByteStream> {
        if self.unreadable.as_deref() == Some(file.name()) {
            return Err(StorageError::Io {
                path: file.location().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "permission denied"),
            });
        }

        let body = self
            .dirs
            .values()
            .flatten()
            .find(|(name, _)| name == file.name())
            .map(|(_, body)| body.clone())
            .ok_or_else(|| StorageError::NotFound(file.location().to_string()))?;

        Ok(Box::pin(Cursor::new(body.into_bytes())))
    }
}

// ============================================================================
// Recording metrics sink
// ============================================================================

/// Keeps the last value of every gauge and the number of reports.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    gauges: Mutex<BTreeMap<String, u64>>,
    reports: Mutex<usize>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        self.gauges.lock().unwrap().get(name).copied()
    }

    pub fn report_count(&self) -> usize {
        *self.reports.lock().unwrap()
    }
}

impl MetricsSink for RecordingMetrics {
    fn gauge(&self, name: &str, value: u64) {
        self.gauges.lock().unwrap().insert(name.to_string(), value);
        *self.reports.lock().unwrap() += 1;
    }
}

// ============================================================================
// Context helpers
// ============================================================================

/// A context on a private registry with a recording metrics sink.
pub fn spy_context(
    driver: Arc<SpyDriver>,
    store: impl FileStore + 'static,
) -> (LoadContext, Arc<RecordingMetrics>) {
    let metrics = Arc::new(RecordingMetrics::new());
    let ctx = LoadContext::new(driver, Arc::new(store))
        .with_registry(DriverRegistry::new())
        .with_metrics(metrics.clone());
    (ctx, metrics)
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    connection_string: String,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .context("Failed to get container port")?;

        Ok(Self {
            _container: container,
            connection_string: format!("postgres://postgres:postgres@{}:{}/postgres", host, port),
        })
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub async fn execute(&self, sql: &str) -> Result<()> {
        let mut conn = self.connect().await?;
        sqlx::raw_sql(sql).execute(&mut conn).await?;
        Ok(())
    }

    pub async fn count(&self, table: &str) -> Result<i64> {
        let mut conn = self.connect().await?;
        let count = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&mut conn)
            .await?;
        Ok(count)
    }

    async fn connect(&self) -> Result<sqlx::PgConnection> {
        use sqlx::Connection as _;
        sqlx::PgConnection::connect(&self.connection_string)
            .await
            .context("Failed to connect to PostgreSQL")
    }
}
