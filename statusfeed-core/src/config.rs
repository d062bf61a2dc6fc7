//! Structural configuration: groups → pipelines → stages → jobs.
//!
//! # Storage layout
//!
//! ```text
//! ~/.statusfeed/
//!   config.yaml     (structural configuration)
//! ```
//!
//! # API pattern
//!
//! Loading has two forms:
//! - `load_at(home)`: explicit home; used in tests with `TempDir`
//! - `load()`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Declaration order is significant everywhere: groups, pipelines within a
//! group, stages within a pipeline and jobs within a stage are kept in the
//! order they appear in the document.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};
use crate::types::{CaseInsensitiveName, ProjectName, SEGMENT_DELIMITER};

/// File name of the structural configuration under the statusfeed root.
pub const CONFIG_FILE: &str = "config.yaml";

// ---------------------------------------------------------------------------
// Configuration tree
// ---------------------------------------------------------------------------

/// Users and roles named in an access-control list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AccessList {
    #[serde(default)]
    pub users: BTreeSet<CaseInsensitiveName>,
    #[serde(default)]
    pub roles: BTreeSet<CaseInsensitiveName>,
}

/// Group-level authorization. Only the view permission matters to the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Authorization {
    #[serde(default)]
    pub view: AccessList,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: CaseInsensitiveName,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    pub name: CaseInsensitiveName,
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

impl StageConfig {
    pub fn new<J>(name: impl Into<CaseInsensitiveName>, jobs: J) -> Self
    where
        J: IntoIterator,
        J::Item: Into<CaseInsensitiveName>,
    {
        Self {
            name: name.into(),
            jobs: jobs
                .into_iter()
                .map(|job| JobConfig { name: job.into() })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: CaseInsensitiveName,
    #[serde(default)]
    pub stages: Vec<StageConfig>,
}

impl PipelineConfig {
    pub fn new(name: impl Into<CaseInsensitiveName>, stages: Vec<StageConfig>) -> Self {
        Self {
            name: name.into(),
            stages,
        }
    }

    pub fn stage(&self, name: &CaseInsensitiveName) -> Option<&StageConfig> {
        self.stages.iter().find(|stage| &stage.name == name)
    }

    /// Entry names for `stage` in feed order: the stage, then its jobs as declared.
    pub fn project_names(&self, stage: &StageConfig) -> Vec<ProjectName> {
        std::iter::once(ProjectName::stage(&self.name, &stage.name))
            .chain(
                stage
                    .jobs
                    .iter()
                    .map(|job| ProjectName::job(&self.name, &stage.name, &job.name)),
            )
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineGroup {
    pub name: CaseInsensitiveName,
    /// Absent means the group is visible to everyone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<Authorization>,
    #[serde(default)]
    pub pipelines: Vec<PipelineConfig>,
}

/// Root of the structural configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CruiseConfig {
    /// Users and roles that may view every group.
    #[serde(default)]
    pub admins: AccessList,
    #[serde(default)]
    pub groups: Vec<PipelineGroup>,
}

impl CruiseConfig {
    /// All pipelines in declaration order (group order, then pipeline order).
    pub fn pipelines(&self) -> impl Iterator<Item = &PipelineConfig> {
        self.groups.iter().flat_map(|group| group.pipelines.iter())
    }

    pub fn pipeline(&self, name: &CaseInsensitiveName) -> Option<&PipelineConfig> {
        self.pipelines().find(|pipeline| &pipeline.name == name)
    }

    /// Append a pipeline to `group`, creating the group at the end if absent.
    pub fn add_pipeline(&mut self, group: impl Into<CaseInsensitiveName>, pipeline: PipelineConfig) {
        let group = group.into();
        match self.groups.iter_mut().find(|g| g.name == group) {
            Some(existing) => existing.pipelines.push(pipeline),
            None => self.groups.push(PipelineGroup {
                name: group,
                authorization: None,
                pipelines: vec![pipeline],
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// `<home>/.statusfeed/`
pub fn root_at(home: &Path) -> PathBuf {
    home.join(".statusfeed")
}

/// `<home>/.statusfeed/config.yaml`. Pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    root_at(home).join(CONFIG_FILE)
}

/// Parse the configuration document at `path`.
///
/// Returns `ConfigError::ConfigNotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML, and
/// `ConfigError::InvalidName` for a name that cannot appear in a project name.
pub fn load_from(path: &Path) -> Result<CruiseConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::ConfigNotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let config: CruiseConfig =
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    if let Some(name) = first_invalid_name(&config) {
        return Err(ConfigError::InvalidName {
            path: path.to_path_buf(),
            name: name.to_string(),
        });
    }
    Ok(config)
}

/// First pipeline, stage or job name that would not survive a trip through
/// `ProjectName`'s string form.
fn first_invalid_name(config: &CruiseConfig) -> Option<&CaseInsensitiveName> {
    config
        .pipelines()
        .flat_map(|pipeline| {
            std::iter::once(&pipeline.name).chain(pipeline.stages.iter().flat_map(|stage| {
                std::iter::once(&stage.name).chain(stage.jobs.iter().map(|job| &job.name))
            }))
        })
        .find(|name| !is_valid_segment(name.as_str()))
}

fn is_valid_segment(raw: &str) -> bool {
    !raw.is_empty() && raw.trim() == raw && !raw.contains(SEGMENT_DELIMITER)
}

/// Load `<home>/.statusfeed/config.yaml`.
pub fn load_at(home: &Path) -> Result<CruiseConfig, ConfigError> {
    load_from(&config_path_at(home))
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<CruiseConfig, ConfigError> {
    load_at(&home()?)
}

/// The user's home directory.
pub fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
