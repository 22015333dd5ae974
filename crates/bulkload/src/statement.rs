//! COPY statement construction

use crate::config::{LoadConfig, LoadLevel};

/// Build the COPY statement the channel is started with.
///
/// `basic` interpolates the table name and delimiter as given; they are
/// checked by validation before a run gets here. `advanced` returns the
/// configured statement untouched.
pub fn build_copy_statement(config: &LoadConfig) -> String {
    match config.level {
        LoadLevel::Basic => format!(
            "COPY {} FROM STDIN DELIMITER '{}'",
            config.table_name,
            config.delimiter.as_deref().unwrap_or_default()
        ),
        LoadLevel::Advanced => config.copy_statement.clone().unwrap_or_default(),
    }
}
