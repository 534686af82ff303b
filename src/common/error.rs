//! Error types for the runner
//!
//! Messages are written to be printed as-is on stderr, so they name the path,
//! endpoint or executable involved and, where useful, how to fix it.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the runner
#[derive(Error, Debug)]
pub enum Error {
    // === Wire Config Errors ===
    #[error(".wire file not found in directory tree {}", root.display())]
    ConfigNotFound { root: PathBuf },

    #[error("Ambiguous wire config: {0}")]
    ConfigAmbiguous(String),

    #[error("Invalid wire config '{}': {reason}", path.display())]
    ConfigInvalid { path: PathBuf, reason: String },

    // === Runner Config Errors ===
    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === Process Errors ===
    #[error("'{name}' executable not found. Searched: {searched}")]
    ExecutableNotFound { name: String, searched: String },

    #[error("Invalid cucumber options: {0}")]
    InvalidOptions(String),

    #[error("Failed to launch '{}': {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    // === Socket Errors ===
    #[error("Failed to listen on {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },
}

impl Error {
    /// Create an invalid wire config error
    pub fn config_invalid(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an executable not found error listing the searched directories
    pub fn executable_not_found<S: AsRef<str>>(name: &str, paths: &[S]) -> Self {
        Self::ExecutableNotFound {
            name: name.to_string(),
            searched: if paths.is_empty() {
                "PATH is empty".to_string()
            } else {
                paths.iter().map(|s| s.as_ref()).collect::<Vec<_>>().join(", ")
            },
        }
    }

    /// Create a bind error for the given endpoint
    pub fn bind(endpoint: impl ToString, source: io::Error) -> Self {
        Self::Bind {
            endpoint: endpoint.to_string(),
            source,
        }
    }
}
