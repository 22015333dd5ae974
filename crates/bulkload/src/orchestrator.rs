//! Bulk-load orchestration
//!
//! [`BulkLoadAction::run`] drives one load end to end: validate, register the
//! driver, verify the target table, open a connection with auto-commit off,
//! stream every input file through a single copy channel, report totals and
//! commit. The connection and driver session are released on every exit path.

use crate::channel::BulkLoadChannel;
use crate::config::{LoadConfig, ROWS_INSERTED_GAUGE, ROWS_REJECTED_GAUGE};
use crate::driver::{Connection, Driver, DriverRegistry, DriverSession};
use crate::error::{DriverError, LoadError, Result, StorageError};
use crate::metrics::{MetricsSink, TracingMetrics};
use crate::statement::build_copy_statement;
use crate::storage::FileStore;
use crate::table;
use crate::validation::FailureCollector;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Collaborators of a run
#[derive(Clone)]
pub struct LoadContext {
    pub registry: Arc<DriverRegistry>,
    pub driver: Arc<dyn Driver>,
    pub store: Arc<dyn FileStore>,
    pub metrics: Arc<dyn MetricsSink>,
}

impl LoadContext {
    /// Context on the process-wide registry, reporting gauges to tracing.
    pub fn new(driver: Arc<dyn Driver>, store: Arc<dyn FileStore>) -> Self {
        Self {
            registry: DriverRegistry::global(),
            driver,
            store,
            metrics: Arc::new(TracingMetrics),
        }
    }

    pub fn with_registry(mut self, registry: Arc<DriverRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunResult {
    pub run_id: Uuid,
    /// As reported by the channel when it finished
    pub rows_inserted: u64,
    /// Sum of the reject lists of every execution
    pub rows_rejected: u64,
    pub files_loaded: usize,
}

/// Running total of rejected rows across the executions of a run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RejectLedger {
    total: u64,
}

impl RejectLedger {
    pub fn record(&mut self, rejected_rows: &[u64]) {
        self.total += rejected_rows.len() as u64;
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

struct Drained {
    rows_inserted: u64,
    ledger: RejectLedger,
    files_loaded: usize,
}

/// A configured bulk-load action
#[derive(Debug, Clone)]
pub struct BulkLoadAction {
    config: LoadConfig,
}

impl BulkLoadAction {
    pub fn new(config: LoadConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LoadConfig {
        &self.config
    }

    /// The statement the channel will be started with.
    pub fn copy_statement(&self) -> String {
        build_copy_statement(&self.config)
    }

    /// Definition-time validation; records problems without touching anything.
    pub fn configure(&self, collector: &mut FailureCollector) {
        self.config.validate(collector);
    }

    /// Execute the load.
    pub async fn run(&self, ctx: &LoadContext) -> Result<RunResult> {
        let run_id = Uuid::new_v4();
        let span = info_span!("bulk_load", %run_id, table = %self.config.table_name);
        self.run_in_span(ctx, run_id).instrument(span).await
    }

    async fn run_in_span(&self, ctx: &LoadContext, run_id: Uuid) -> Result<RunResult> {
        let mut collector = FailureCollector::new();
        self.configure(&mut collector);
        collector.get_or_throw()?;

        let session = ctx.registry.acquire(Arc::clone(&ctx.driver));
        let outcome = self.run_with_session(&session, ctx, run_id).await;
        session.release();

        match &outcome {
            Ok(result) => info!(
                rows_inserted = result.rows_inserted,
                rows_rejected = result.rows_rejected,
                files = result.files_loaded,
                "bulk load complete"
            ),
            Err(e) => warn!(error = %e, "bulk load failed"),
        }
        outcome
    }

    async fn run_with_session(
        &self,
        session: &DriverSession,
        ctx: &LoadContext,
        run_id: Uuid,
    ) -> Result<RunResult> {
        if !table::table_exists(session, &self.config).await? {
            return Err(LoadError::TableNotFound {
                table: self.config.table_name.clone(),
                target: self.config.redacted_connection_string(),
            });
        }

        let statement = self.copy_statement();
        debug!(%statement, "copy statement");

        let credentials = self.config.credentials();
        let mut connection = session
            .connect(&self.config.connection_string, credentials.as_ref())
            .await
            .map_err(|source| LoadError::Connectivity {
                target: self.config.redacted_connection_string(),
                source,
            })?;

        let loaded = self.load(connection.as_mut(), &statement, ctx, run_id).await;

        match (loaded, connection.close().await) {
            (Ok(result), Ok(())) => Ok(result),
            (Ok(_), Err(e)) => Err(LoadError::load_execution(&statement, e)),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_error)) => {
                warn!(error = %close_error, "failed to close connection after a failed load");
                Err(e)
            }
        }
    }

    async fn load(
        &self,
        connection: &mut dyn Connection,
        statement: &str,
        ctx: &LoadContext,
        run_id: Uuid,
    ) -> Result<RunResult> {
        connection
            .set_auto_commit(false)
            .await
            .map_err(|source| LoadError::Connectivity {
                target: self.config.redacted_connection_string(),
                source,
            })?;

        let mut channel = BulkLoadChannel::new(&mut *connection, statement);
        let drained = match self.drain(&mut channel, ctx).await {
            Ok(drained) => drained,
            Err(e) => {
                if channel.is_open() {
                    if let Err(abort_error) = channel.abort().await {
                        warn!(error = %abort_error, "failed to abort copy channel");
                    }
                }
                return Err(e);
            }
        };

        let rows_rejected = drained.ledger.total();
        ctx.metrics.gauge(ROWS_REJECTED_GAUGE, rows_rejected);
        ctx.metrics.gauge(ROWS_INSERTED_GAUGE, drained.rows_inserted);

        connection
            .commit()
            .await
            .map_err(|e| LoadError::load_execution(statement, e))?;

        Ok(RunResult {
            run_id,
            rows_inserted: drained.rows_inserted,
            rows_rejected,
            files_loaded: drained.files_loaded,
        })
    }

    /// Start the channel, stream every file through it, and finish it.
    async fn drain(&self, channel: &mut BulkLoadChannel<'_>, ctx: &LoadContext) -> Result<Drained> {
        let statement = channel.statement().to_string();
        let failed = |e: DriverError| LoadError::load_execution(&statement, e);

        channel.start().await.map_err(failed)?;

        let files = match ctx.store.list_entries(&self.config.path).await {
            Ok(files) => files,
            Err(StorageError::NotFound(_)) => {
                return Err(LoadError::PathNotFound {
                    path: self.config.path.clone(),
                })
            }
            Err(e) => return Err(LoadError::load_execution(&statement, e)),
        };

        if files.is_empty() {
            warn!(path = %self.config.path, "No files available to load");
        } else {
            info!(path = %self.config.path, files = files.len(), "loading files");
        }

        let mut ledger = RejectLedger::default();
        for (index, file) in files.iter().enumerate() {
            debug!(file = %file, n = index + 1, of = files.len(), "streaming file");

            let stream = ctx
                .store
                .open_read(file)
                .await
                .map_err(|e| LoadError::load_execution(&statement, e))?;
            channel.add_stream(stream).await.map_err(failed)?;

            let rejects = channel.execute().await.map_err(failed)?;
            if !rejects.is_empty() {
                warn!(file = %file, rejected = rejects.len(), "rows rejected");
            }
            ledger.record(&rejects);

            if self.config.auto_commit {
                channel.commit().await.map_err(failed)?;
            }
        }

        let rows_inserted = channel.finish().await.map_err(failed)?;

        Ok(Drained {
            rows_inserted,
            ledger,
            files_loaded: files.len(),
        })
    }
}
