//! Error types for statusfeed-sync.

use std::path::PathBuf;

use thiserror::Error;

use statusfeed_core::{CaseInsensitiveName, ConfigError};

/// All errors that can arise around a reconciliation pass.
///
/// None of these abort a pass once it has started: history failures are
/// downgraded to "not found" by the resolver.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error from loading the structural configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (history store).
    #[error("history store JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A single-pipeline sync named a pipeline the configuration does not declare.
    #[error("pipeline '{0}' is not declared in the configuration")]
    PipelineNotFound(CaseInsensitiveName),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
