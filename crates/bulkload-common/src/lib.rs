//! bulkload common library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared plumbing for the bulkload workspace members. Today this is the
//! logging setup used by the `bulkload` binary and its integration tests.
//!
//! # Example
//!
//! ```no_run
//! use bulkload_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

pub mod logging;

pub use logging::{init_logging, LogConfig, LoggingGuard};
