//! statusfeed core library: domain types, structural configuration, errors.
//!
//! Public API surface:
//! - [`types`]: case-insensitive names, status entries and viewer sets
//! - [`config`]: the pipeline/stage/job configuration tree and its loader
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    AccessList, Authorization, CruiseConfig, JobConfig, PipelineConfig, PipelineGroup,
    StageConfig,
};
pub use error::ConfigError;
pub use types::{
    CaseInsensitiveName, EntryStatus, ExecutionStatus, Principal, ProjectName, StatusEntry,
    Viewers,
};
