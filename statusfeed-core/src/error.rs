//! Error types for statusfeed-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from loading the structural configuration or
/// parsing domain identifiers.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure while reading the configuration file.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load; carries the file path and serde_yaml line context.
    #[error("failed to parse configuration at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`; cannot locate `~/.statusfeed/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The configuration file did not exist at the expected path.
    #[error("configuration not found at {path}")]
    ConfigNotFound { path: PathBuf },

    /// A pipeline, stage or job name that cannot be joined into a project
    /// name and parsed back to the same unit.
    #[error("invalid name '{name}' in {path}; names must be non-empty, have no surrounding whitespace and not contain '::'")]
    InvalidName { path: PathBuf, name: String },

    /// A project name that is not `"<pipeline> :: <stage>"` or
    /// `"<pipeline> :: <stage> :: <job>"`.
    #[error("invalid project name '{0}'; expected '<pipeline> :: <stage>[ :: <job>]'")]
    InvalidProjectName(String),
}

/// Convenience constructor for [`ConfigError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
