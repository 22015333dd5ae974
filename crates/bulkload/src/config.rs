//! Load configuration
//!
//! A [`LoadConfig`] describes one bulk-load action: which table, which
//! database, which files, and how the COPY statement is formed. It is read
//! from an optional config file overlaid with `BULKLOAD_*` environment
//! variables, and is validated separately (see [`crate::validation`]) so that
//! every problem can be reported at once.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Environment variable prefix for load properties, e.g. `BULKLOAD_TABLE_NAME`.
pub const ENV_PREFIX: &str = "BULKLOAD";

/// Gauge name for the aggregate reject count.
pub const ROWS_REJECTED_GAUGE: &str = "num.of.rows.rejected";

/// Gauge name for the inserted row count reported by the channel.
pub const ROWS_INSERTED_GAUGE: &str = "num.of.rows.inserted";

/// How the COPY statement is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", rename_all = "lowercase")]
pub enum LoadLevel {
    /// Generated from the table name and delimiter
    #[default]
    Basic,
    /// Supplied verbatim by the user
    Advanced,
}

impl FromStr for LoadLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(LoadLevel::Basic),
            "advanced" => Ok(LoadLevel::Advanced),
            other => Err(format!(
                "unknown load level '{}', expected 'basic' or 'advanced'",
                other
            )),
        }
    }
}

impl TryFrom<String> for LoadLevel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for LoadLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadLevel::Basic => write!(f, "basic"),
            LoadLevel::Advanced => write!(f, "advanced"),
        }
    }
}

/// Database login
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .finish()
    }
}

/// Configuration of a single bulk-load action
///
/// Property names accept both snake_case and the camelCase used by pipeline
/// definitions (`tableName`, `connectionString`, `copyStatement`, `autoCommit`).
/// Missing properties deserialize to empty values and are reported by
/// validation rather than by the parser.
#[derive(Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    #[serde(default, alias = "tableName", alias = "tablename")]
    pub table_name: String,

    /// Database URL, e.g. `postgres://warehouse.internal:5433/analytics`
    #[serde(default, alias = "connectionString", alias = "connectionstring")]
    pub connection_string: String,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// Directory (or single file) holding the input, local or `s3://bucket/prefix`
    #[serde(default)]
    pub path: String,

    #[serde(default)]
    pub level: LoadLevel,

    /// Field delimiter, `basic` level only
    #[serde(default)]
    pub delimiter: Option<String>,

    /// Complete COPY statement, `advanced` level only
    #[serde(default, alias = "copyStatement", alias = "copystatement")]
    pub copy_statement: Option<String>,

    /// Commit after every file instead of only at the end of the run
    #[serde(default, alias = "autoCommit", alias = "autocommit")]
    pub auto_commit: bool,
}

impl LoadConfig {
    /// A `basic` level configuration.
    pub fn basic(
        table_name: impl Into<String>,
        connection_string: impl Into<String>,
        path: impl Into<String>,
        delimiter: impl Into<String>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            connection_string: connection_string.into(),
            user: None,
            password: None,
            path: path.into(),
            level: LoadLevel::Basic,
            delimiter: Some(delimiter.into()),
            copy_statement: None,
            auto_commit: false,
        }
    }

    /// An `advanced` level configuration with a user supplied statement.
    pub fn advanced(
        table_name: impl Into<String>,
        connection_string: impl Into<String>,
        path: impl Into<String>,
        copy_statement: impl Into<String>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            connection_string: connection_string.into(),
            user: None,
            password: None,
            path: path.into(),
            level: LoadLevel::Advanced,
            delimiter: None,
            copy_statement: Some(copy_statement.into()),
            auto_commit: false,
        }
    }

    pub fn with_auto_commit(mut self, auto_commit: bool) -> Self {
        self.auto_commit = auto_commit;
        self
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: Option<String>) -> Self {
        self.user = Some(user.into());
        self.password = password;
        self
    }

    /// Load from an optional file plus `BULKLOAD_*` environment variables.
    ///
    /// A `.env` file in the working directory is honoured. Environment values
    /// take precedence over the file.
    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(config::File::from(file).required(true));
        }
        // values stay strings; `auto_commit` is converted when deserialized
        builder = builder.add_source(config::Environment::with_prefix(ENV_PREFIX).prefix_separator("_"));

        let settings = builder.build().with_context(|| match file {
            Some(file) => format!("Failed to read load configuration from {}", file.display()),
            None => "Failed to read load configuration from the environment".to_string(),
        })?;

        settings
            .try_deserialize()
            .context("Failed to parse load configuration")
    }

    /// Login to use, if a user was configured.
    pub fn credentials(&self) -> Option<Credentials> {
        self.user.as_ref().map(|user| Credentials {
            user: user.clone(),
            password: self.password.clone(),
        })
    }

    /// The connection string with any embedded password masked.
    pub fn redacted_connection_string(&self) -> String {
        redact_connection_string(&self.connection_string)
    }
}

impl fmt::Debug for LoadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadConfig")
            .field("table_name", &self.table_name)
            .field("connection_string", &self.redacted_connection_string())
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("path", &self.path)
            .field("level", &self.level)
            .field("delimiter", &self.delimiter)
            .field("copy_statement", &self.copy_statement)
            .field("auto_commit", &self.auto_commit)
            .finish()
    }
}

/// Mask the password of a URL style connection string.
///
/// Strings that do not parse as URLs are returned unchanged.
pub fn redact_connection_string(connection_string: &str) -> String {
    match url::Url::parse(connection_string) {
        Ok(mut url) if url.password().is_some() => {
            if url.set_password(Some("****")).is_ok() {
                url.to_string()
            } else {
                connection_string.to_string()
            }
        }
        _ => connection_string.to_string(),
    }
}
