//! Error types for zonepub-state

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading or committing the publish state.
#[derive(Error, Debug)]
pub enum StateStoreError {
    /// The state file exists but could not be read.
    #[error("failed to read state file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The state file could not be parsed.
    #[error("state file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Writing or renaming the new state file failed.
    #[error("failed to commit state file {path}: {source}")]
    Commit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Encoding the state failed.
    #[error("state serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend-specific failure (used by fakes and alternative stores).
    #[error("state backend error: {0}")]
    Backend(String),
}
