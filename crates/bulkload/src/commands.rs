//! `bulkload` subcommand implementations
//!
//! Each command loads the configuration itself and writes its report to
//! `out`, so the binary only handles argument parsing and exit codes.

use crate::config::LoadConfig;
use crate::driver::PgDriver;
use crate::orchestrator::{BulkLoadAction, LoadContext};
use crate::storage::store_for_path;
use crate::validation::FailureCollector;
use anyhow::{bail, Context};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

/// Run the load and print its result as JSON.
pub async fn run(config_file: Option<&Path>, out: &mut impl Write) -> anyhow::Result<()> {
    let action = BulkLoadAction::new(LoadConfig::load(config_file)?);

    let store = store_for_path(&action.config().path)
        .await
        .context("Failed to open input storage")?;
    let ctx = LoadContext::new(Arc::new(PgDriver::new()), store);

    let result = action.run(&ctx).await?;

    serde_json::to_writer_pretty(&mut *out, &result).context("Failed to write run result")?;
    writeln!(out)?;
    Ok(())
}

/// Print every validation failure; fails if there is at least one.
pub fn validate(config_file: Option<&Path>, out: &mut impl Write) -> anyhow::Result<()> {
    let action = BulkLoadAction::new(LoadConfig::load(config_file)?);

    let mut collector = FailureCollector::new();
    action.configure(&mut collector);

    if collector.is_empty() {
        writeln!(out, "Configuration is valid")?;
        return Ok(());
    }

    for failure in collector.failures() {
        writeln!(out, "- {}", failure)?;
    }
    bail!(
        "Configuration has {} problem(s)",
        collector.failures().len()
    )
}

/// Print the COPY statement a run would start the channel with.
pub fn statement(config_file: Option<&Path>, out: &mut impl Write) -> anyhow::Result<()> {
    let action = BulkLoadAction::new(LoadConfig::load(config_file)?);
    writeln!(out, "{}", action.copy_statement())?;
    Ok(())
}
