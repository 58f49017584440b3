//! Error types for each stage of the ETL run.

use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

/// Problems with the configuration file. Always fatal, and always raised
/// before any network or database call.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not determine platform config directory")]
    NoConfigDir,

    #[error("Failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize configuration to TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write config file {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Missing required configuration keys: {}", .0.join(", "))]
    MissingKeys(Vec<String>),

    #[error("Invalid value for `{key}`: {reason}")]
    Invalid { key: String, reason: String },
}

/// A failed forecast request for a single city. Never fatal to the run.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),

    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Weather API returned status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Failed to decode weather API response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Warehouse failures. Fatal to the run; the batch either lands or the run
/// is reported as failed for a manual rerun.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to connect to warehouse: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("Invalid table identifier `{0}`")]
    InvalidIdentifier(String),

    #[error("Schema ensure failed for `{table}`: {source}")]
    Schema {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Staging into `{table}` failed: {source}")]
    Stage {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Merge into `{table}` failed: {source}")]
    Merge {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Dropping `{table}` failed: {source}")]
    Drop {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Warehouse error: {0}")]
    Backend(String),
}

/// Top-level error for a pipeline run.
#[derive(Error, Debug)]
pub enum EtlError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Load(#[from] LoadError),
}

impl FetchError {
    /// Build a status error, keeping only the head of the response body.
    pub fn status(status: StatusCode, body: &str) -> Self {
        Self::Status { status, body: truncate_body(body) }
    }
}

impl LoadError {
    /// Name of the step that failed, for log lines.
    pub fn step(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::InvalidIdentifier(_) => "validate",
            Self::Schema { .. } => "schema",
            Self::Stage { .. } => "stage",
            Self::Merge { .. } => "merge",
            Self::Drop { .. } => "drop",
            Self::Backend(_) => "backend",
        }
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
