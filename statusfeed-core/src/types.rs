//! Domain types for the status feed.
//!
//! Identifiers of pipelines, stages, jobs, users and roles compare
//! case-insensitively. A [`StatusEntry`] is addressed by a hierarchical
//! [`ProjectName`] and carries either known execution data or a placeholder.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Separator between the segments of a [`ProjectName`].
pub const NAME_SEPARATOR: &str = " :: ";

/// What [`ProjectName::parse`] splits on; surrounding whitespace is trimmed.
pub const SEGMENT_DELIMITER: &str = "::";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// An identifier that keeps its original spelling but compares, hashes and
/// orders ignoring ASCII case.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseInsensitiveName(String);

impl CaseInsensitiveName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for CaseInsensitiveName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for CaseInsensitiveName {}

impl Hash for CaseInsensitiveName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.0.bytes() {
            state.write_u8(byte.to_ascii_lowercase());
        }
        state.write_u8(0xff);
    }
}

impl Ord for CaseInsensitiveName {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.0.bytes().map(|b| b.to_ascii_lowercase());
        let rhs = other.0.bytes().map(|b| b.to_ascii_lowercase());
        lhs.cmp(rhs)
    }
}

impl PartialOrd for CaseInsensitiveName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for CaseInsensitiveName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for CaseInsensitiveName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CaseInsensitiveName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Hierarchical identifier of a feed entry: `"<pipeline> :: <stage>"` for a
/// stage, `"<pipeline> :: <stage> :: <job>"` for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectName {
    pipeline: CaseInsensitiveName,
    stage: CaseInsensitiveName,
    job: Option<CaseInsensitiveName>,
}

impl ProjectName {
    /// Name of the entry for a stage.
    pub fn stage(pipeline: &CaseInsensitiveName, stage: &CaseInsensitiveName) -> Self {
        Self {
            pipeline: pipeline.clone(),
            stage: stage.clone(),
            job: None,
        }
    }

    /// Name of the entry for a job within a stage.
    pub fn job(
        pipeline: &CaseInsensitiveName,
        stage: &CaseInsensitiveName,
        job: &CaseInsensitiveName,
    ) -> Self {
        Self {
            pipeline: pipeline.clone(),
            stage: stage.clone(),
            job: Some(job.clone()),
        }
    }

    /// Parse `"p :: s"` or `"p :: s :: j"`. Whitespace around segments is ignored.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let segments: Vec<&str> = raw.split(SEGMENT_DELIMITER).map(str::trim).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(ConfigError::InvalidProjectName(raw.to_owned()));
        }
        match segments.as_slice() {
            [pipeline, stage] => Ok(Self::stage(&(*pipeline).into(), &(*stage).into())),
            [pipeline, stage, job] => Ok(Self::job(
                &(*pipeline).into(),
                &(*stage).into(),
                &(*job).into(),
            )),
            _ => Err(ConfigError::InvalidProjectName(raw.to_owned())),
        }
    }

    /// The owning pipeline (first segment).
    pub fn pipeline(&self) -> &CaseInsensitiveName {
        &self.pipeline
    }

    pub fn stage_name(&self) -> &CaseInsensitiveName {
        &self.stage
    }

    pub fn job_name(&self) -> Option<&CaseInsensitiveName> {
        self.job.as_ref()
    }

    pub fn is_job(&self) -> bool {
        self.job.is_some()
    }
}

impl fmt::Display for ProjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{NAME_SEPARATOR}{}", self.pipeline, self.stage)?;
        if let Some(job) = &self.job {
            write!(f, "{NAME_SEPARATOR}{job}")?;
        }
        Ok(())
    }
}

impl TryFrom<String> for ProjectName {
    type Error = ConfigError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<ProjectName> for String {
    fn from(name: ProjectName) -> Self {
        name.to_string()
    }
}

// ---------------------------------------------------------------------------
// Viewers
// ---------------------------------------------------------------------------

/// A user together with the roles they hold, as presented by a feed reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user: CaseInsensitiveName,
    #[serde(default)]
    pub roles: BTreeSet<CaseInsensitiveName>,
}

impl Principal {
    pub fn new(user: impl Into<CaseInsensitiveName>) -> Self {
        Self {
            user: user.into(),
            roles: BTreeSet::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<CaseInsensitiveName>) -> Self {
        self.roles.insert(role.into());
        self
    }
}

/// Who may see a feed entry.
///
/// `Allowed` with no users and no roles is the deny-all set, and is what a
/// freshly created entry carries until permissions are applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Viewers {
    Everyone,
    Allowed {
        #[serde(default)]
        users: BTreeSet<CaseInsensitiveName>,
        #[serde(default)]
        roles: BTreeSet<CaseInsensitiveName>,
    },
}

impl Default for Viewers {
    fn default() -> Self {
        Self::no_one()
    }
}

impl Viewers {
    pub fn no_one() -> Self {
        Self::Allowed {
            users: BTreeSet::new(),
            roles: BTreeSet::new(),
        }
    }

    pub fn allowed<U, R>(users: U, roles: R) -> Self
    where
        U: IntoIterator,
        U::Item: Into<CaseInsensitiveName>,
        R: IntoIterator,
        R::Item: Into<CaseInsensitiveName>,
    {
        Self::Allowed {
            users: users.into_iter().map(Into::into).collect(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn users<U>(users: U) -> Self
    where
        U: IntoIterator,
        U::Item: Into<CaseInsensitiveName>,
    {
        Self::allowed(users, std::iter::empty::<CaseInsensitiveName>())
    }

    /// True when the user is listed by name (roles are not consulted).
    pub fn contains(&self, user: &str) -> bool {
        match self {
            Viewers::Everyone => true,
            Viewers::Allowed { users, .. } => users.contains(&CaseInsensitiveName::from(user)),
        }
    }

    /// True when the principal is listed by name or holds a listed role.
    pub fn allows(&self, principal: &Principal) -> bool {
        match self {
            Viewers::Everyone => true,
            Viewers::Allowed { users, roles } => {
                users.contains(&principal.user) || !roles.is_disjoint(&principal.roles)
            }
        }
    }

    pub fn is_deny_all(&self) -> bool {
        matches!(self, Viewers::Allowed { users, roles } if users.is_empty() && roles.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Status entries
// ---------------------------------------------------------------------------

/// Last-known execution data of a stage or job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStatus {
    pub activity: String,
    pub outcome: String,
    pub label: String,
    pub last_updated: DateTime<Utc>,
    pub web_url: String,
}

/// Whether an entry carries real execution data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EntryStatus {
    /// Structurally declared, but nothing is known about its execution.
    Placeholder,
    Known(ExecutionStatus),
}

/// One row of the status feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub name: ProjectName,
    #[serde(flatten)]
    pub status: EntryStatus,
    #[serde(default)]
    pub viewers: Viewers,
}

impl StatusEntry {
    /// An entry with known execution data and no viewers yet.
    pub fn known(name: ProjectName, status: ExecutionStatus) -> Self {
        Self {
            name,
            status: EntryStatus::Known(status),
            viewers: Viewers::no_one(),
        }
    }

    /// An entry for a unit with no execution record.
    pub fn placeholder(name: ProjectName) -> Self {
        Self {
            name,
            status: EntryStatus::Placeholder,
            viewers: Viewers::no_one(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.status, EntryStatus::Placeholder)
    }

    pub fn execution(&self) -> Option<&ExecutionStatus> {
        match &self.status {
            EntryStatus::Known(status) => Some(status),
            EntryStatus::Placeholder => None,
        }
    }

    pub fn pipeline(&self) -> &CaseInsensitiveName {
        self.name.pipeline()
    }

    pub fn with_viewers(mut self, viewers: Viewers) -> Self {
        self.viewers = viewers;
        self
    }

    pub fn can_be_viewed_by(&self, principal: &Principal) -> bool {
        self.viewers.allows(principal)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
