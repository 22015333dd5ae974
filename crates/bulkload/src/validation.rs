//! Configuration validation
//!
//! Validation never performs I/O. Failures are accumulated in a
//! [`FailureCollector`] so a pipeline author sees every problem in one pass;
//! [`FailureCollector::get_or_throw`] converts them into
//! [`LoadError::ConfigValidation`] when the run must stop.

use crate::config::{LoadConfig, LoadLevel};
use crate::error::{LoadError, Result};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// Plain or schema-qualified identifier accepted as a target table.
static TABLE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*(\.[A-Za-z_][A-Za-z0-9_$]*)?$")
        .unwrap_or_else(|e| unreachable!("table name pattern is valid: {}", e))
});

/// Characters that would break out of the generated `DELIMITER '<c>'` literal.
const FORBIDDEN_DELIMITERS: &[char] = &['\'', '\\', '\n', '\r'];

/// One problem found in a configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub message: String,
    pub corrective_action: Option<String>,
    /// Name of the offending property as it appears in pipeline definitions
    pub property: String,
}

impl ValidationFailure {
    pub fn new(message: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            corrective_action: None,
            property: property.into(),
        }
    }

    pub fn with_corrective_action(mut self, action: impl Into<String>) -> Self {
        self.corrective_action = Some(action.into());
        self
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (property '{}')", self.message, self.property)?;
        if let Some(ref action) = self.corrective_action {
            write!(f, ". {}", action)?;
        }
        Ok(())
    }
}

/// Sink for validation failures
#[derive(Debug, Default)]
pub struct FailureCollector {
    failures: Vec<ValidationFailure>,
}

impl FailureCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_failure(&mut self, failure: ValidationFailure) {
        self.failures.push(failure);
    }

    pub fn failures(&self) -> &[ValidationFailure] {
        &self.failures
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Fail with every recorded failure, or succeed if there are none.
    pub fn get_or_throw(self) -> Result<()> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(LoadError::ConfigValidation(self.failures))
        }
    }
}

impl LoadConfig {
    /// Record every shape problem of this configuration in `collector`.
    pub fn validate(&self, collector: &mut FailureCollector) {
        self.validate_table_name(collector);
        self.validate_connection(collector);

        if self.path.trim().is_empty() {
            collector.add_failure(
                ValidationFailure::new("Path is required", "path")
                    .with_corrective_action("Set the directory or object prefix holding the input files"),
            );
        }

        match self.level {
            LoadLevel::Basic => self.validate_delimiter(collector),
            LoadLevel::Advanced => {
                let blank = self
                    .copy_statement
                    .as_deref()
                    .map_or(true, |s| s.trim().is_empty());
                if blank {
                    collector.add_failure(
                        ValidationFailure::new(
                            "Copy statement is required for the advanced load level",
                            "copyStatement",
                        )
                        .with_corrective_action("Provide a complete COPY ... FROM STDIN statement"),
                    );
                }
            }
        }
    }

    fn validate_table_name(&self, collector: &mut FailureCollector) {
        if self.table_name.trim().is_empty() {
            collector.add_failure(ValidationFailure::new("Table name is required", "tableName"));
        } else if !TABLE_NAME.is_match(&self.table_name) {
            collector.add_failure(
                ValidationFailure::new(
                    format!("Table name '{}' is not a valid identifier", self.table_name),
                    "tableName",
                )
                .with_corrective_action(
                    "Use letters, digits, '_' or '$', optionally qualified as schema.table",
                ),
            );
        }
    }

    fn validate_connection(&self, collector: &mut FailureCollector) {
        if self.connection_string.trim().is_empty() {
            collector.add_failure(ValidationFailure::new(
                "Connection string is required",
                "connectionString",
            ));
        } else if let Err(e) = url::Url::parse(&self.connection_string) {
            collector.add_failure(
                ValidationFailure::new(
                    format!("Connection string is not a valid URL: {}", e),
                    "connectionString",
                )
                .with_corrective_action("Use the form scheme://host:port/database"),
            );
        }

        let has_user = self.user.as_deref().is_some_and(|u| !u.is_empty());
        if self.password.is_some() && !has_user {
            collector.add_failure(
                ValidationFailure::new("Password is set but user is not", "user")
                    .with_corrective_action("Set 'user' or remove 'password'"),
            );
        }
    }

    fn validate_delimiter(&self, collector: &mut FailureCollector) {
        let Some(ref delimiter) = self.delimiter else {
            collector.add_failure(
                ValidationFailure::new("Delimiter is required for the basic load level", "delimiter")
                    .with_corrective_action("Set a single character delimiter such as ',' or '|'"),
            );
            return;
        };

        let mut chars = delimiter.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if FORBIDDEN_DELIMITERS.contains(&c) => {
                collector.add_failure(ValidationFailure::new(
                    format!("Delimiter {:?} cannot be used inside a quoted literal", c),
                    "delimiter",
                ));
            }
            (Some(_), None) => {}
            _ => {
                collector.add_failure(
                    ValidationFailure::new(
                        format!("Delimiter {:?} must be exactly one character", delimiter),
                        "delimiter",
                    )
                    .with_corrective_action("Set a single character delimiter such as ',' or '|'"),
                );
            }
        }
    }
}
