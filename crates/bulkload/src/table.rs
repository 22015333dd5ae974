//! Target table existence check

use crate::config::LoadConfig;
use crate::driver::DriverSession;
use crate::error::{LoadError, Result};
use tracing::{debug, warn};

/// Look the configured table up through the database metadata.
///
/// Uses a connection of its own, which is closed whether or not the lookup
/// succeeds. Failing to reach the database or read its catalog is a
/// [`LoadError::Connectivity`].
pub async fn table_exists(session: &DriverSession, config: &LoadConfig) -> Result<bool> {
    let credentials = config.credentials();
    let mut connection = session
        .connect(&config.connection_string, credentials.as_ref())
        .await
        .map_err(|source| LoadError::Connectivity {
            target: config.redacted_connection_string(),
            source,
        })?;

    let lookup = connection.table_exists(&config.table_name).await;
    if let Err(e) = connection.close().await {
        warn!(error = %e, "failed to close metadata connection");
    }

    let exists = lookup.map_err(|source| LoadError::Connectivity {
        target: config.redacted_connection_string(),
        source,
    })?;
    debug!(table = %config.table_name, exists, "table lookup");
    Ok(exists)
}
