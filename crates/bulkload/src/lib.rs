//! bulkload library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Loads every file under a storage path into one database table through the
//! database's `COPY ... FROM STDIN` channel.
//!
//! # Overview
//!
//! - **Configuration**: [`LoadConfig`] from a file and `BULKLOAD_*` variables,
//!   checked by [`LoadConfig::validate`]
//! - **Storage**: local directories and S3 prefixes behind [`FileStore`]
//! - **Database**: [`Driver`] / [`Connection`] traits, with [`PgDriver`] for
//!   PostgreSQL-wire databases
//! - **Orchestration**: [`BulkLoadAction::run`] streams the files through a
//!   single [`BulkLoadChannel`] and reports `num.of.rows.inserted` /
//!   `num.of.rows.rejected`
//!
//! # Example
//!
//! ```no_run
//! use bulkload::{BulkLoadAction, LoadConfig, LoadContext, PgDriver};
//! use bulkload::storage::store_for_path;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = LoadConfig::basic("events", "postgres://db:5432/warehouse", "/data/batch1", ",");
//! let store = store_for_path(&config.path).await?;
//! let ctx = LoadContext::new(Arc::new(PgDriver::new()), store);
//!
//! let result = BulkLoadAction::new(config).run(&ctx).await?;
//! println!("{} rows inserted", result.rows_inserted);
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod commands;
pub mod config;
pub mod driver;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod statement;
pub mod storage;
pub mod table;
pub mod validation;

// Re-export commonly used types
pub use channel::{BulkLoadChannel, ChannelState};
pub use config::{Credentials, LoadConfig, LoadLevel};
pub use driver::{Connection, Driver, DriverRegistry, DriverSession, PgDriver};
pub use error::{DriverError, LoadError, LoadFailure, Result, StorageError};
pub use metrics::{MetricsSink, TracingMetrics};
pub use orchestrator::{BulkLoadAction, LoadContext, RejectLedger, RunResult};
pub use storage::{FileHandle, FileStore, LocalFileStore, S3FileStore};
pub use validation::{FailureCollector, ValidationFailure};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// bulkload - stream files into a database table with COPY
#[derive(Parser, Debug)]
#[command(name = "bulkload")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load every file under the configured path
    Run {
        /// Load configuration file (TOML, YAML or JSON)
        #[arg(short, long, env = "BULKLOAD_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Check a configuration without touching the database
    Validate {
        #[arg(short, long, env = "BULKLOAD_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Print the COPY statement a run would use
    Statement {
        #[arg(short, long, env = "BULKLOAD_CONFIG")]
        config: Option<PathBuf>,
    },
}
