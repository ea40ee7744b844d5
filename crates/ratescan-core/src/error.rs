//! Error types for ratescan operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for ratescan operations
pub type Result<T> = std::result::Result<T, RatescanError>;

/// Errors that abort a capacity search.
///
/// Per-request failures (connection refused, timeouts, HTTP 5xx) are never
/// represented here: they are folded into the measurement as error outcomes.
#[derive(Error, Debug)]
pub enum RatescanError {
    // === Configuration ===
    /// A configured value is out of its accepted range
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Configuration file could not be parsed
    #[error("Failed to parse configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration file or request body could not be read
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // === Artifacts ===
    /// Latency distribution file could not be written or promoted
    #[error("Failed to persist artifact {path}: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // === Collaborators ===
    /// HTTP client could not be constructed
    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    /// Histogram could not be created with the configured bounds
    #[error("Histogram error: {0}")]
    Histogram(String),

    /// Metrics registry rejected a collector or could not encode
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl RatescanError {
    /// Shorthand for a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the error stems from invalid user input rather than the environment
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Toml(_))
    }
}

impl From<hdrhistogram::CreationError> for RatescanError {
    fn from(err: hdrhistogram::CreationError) -> Self {
        Self::Histogram(err.to_string())
    }
}
