//! Error types for the hacluster crate.

use std::io;

use thiserror::Error;

/// Main error type for cluster convergence operations
#[derive(Error, Debug)]
pub enum HaError {
    /// Local charm configuration is missing or invalid
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A peer-published resource bundle failed strict deserialization
    #[error("Malformed resource specification in '{key}': {source}")]
    SpecParse {
        /// Relation key the malformed blob was read from
        key: String,
        /// Underlying deserialization failure
        #[source]
        source: serde_json::Error,
    },

    /// Relation relay access failed
    #[error("Relation relay error: {0}")]
    Relay(String),

    /// A cluster-manager control-plane command failed
    #[error("Cluster manager command failed: `{cmd}`: {detail}")]
    CommandFailed {
        /// The command that was issued
        cmd: String,
        /// Captured failure detail (exit status, stderr)
        detail: String,
    },

    /// The cluster manager never became operational within the retry budget
    #[error("Cluster manager not operational after {attempts} attempts")]
    NotOperational {
        /// Number of poll attempts made before giving up
        attempts: u32,
    },

    /// Node inventory unreachable, empty, or unusable
    #[error("Inventory error: {0}")]
    Inventory(String),

    /// No fencing primitive could be derived for a cluster member
    #[error("Failed to derive fencing primitive for node: {0}")]
    FencingDerivation(String),

    /// Package installation failed
    #[error("Package installation failed: {0}")]
    PackageInstall(String),

    /// Local service control operation failed
    #[error("Service control error: {0}")]
    ServiceControl(String),

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Type alias for Result with HaError
pub type HaResult<T> = Result<T, HaError>;

impl From<base64::DecodeError> for HaError {
    fn from(err: base64::DecodeError) -> Self {
        HaError::Configuration(format!("invalid base64 key material: {}", err))
    }
}
