//! Pipeline view permissions.
//!
//! [`PermissionsAuthority`] answers "who may view pipeline X". The
//! [`ConfigPermissionsAuthority`] derives that from group authorization in the
//! structural configuration:
//!
//! - a group without an `authorization` block is visible to everyone;
//! - otherwise its pipelines are visible to the group's view users and roles,
//!   plus the configuration-wide admins.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use statusfeed_core::{AccessList, CaseInsensitiveName, CruiseConfig, PipelineGroup, Viewers};

/// Pipeline → viewer-set lookups. `None` means the pipeline is unknown to the
/// authority's current computation.
pub trait PermissionsAuthority: Send + Sync {
    fn viewers_for_all_pipelines(&self) -> HashMap<CaseInsensitiveName, Viewers>;

    fn viewers_for_pipeline(&self, pipeline: &CaseInsensitiveName) -> Option<Viewers>;
}

impl PermissionsAuthority for HashMap<CaseInsensitiveName, Viewers> {
    fn viewers_for_all_pipelines(&self) -> HashMap<CaseInsensitiveName, Viewers> {
        self.clone()
    }

    fn viewers_for_pipeline(&self, pipeline: &CaseInsensitiveName) -> Option<Viewers> {
        self.get(pipeline).cloned()
    }
}

/// Compute the viewer set of every pipeline declared in `config`.
pub fn compute_viewers(config: &CruiseConfig) -> HashMap<CaseInsensitiveName, Viewers> {
    let mut viewers = HashMap::new();
    for group in &config.groups {
        let group_viewers = group_viewers(group, &config.admins);
        for pipeline in &group.pipelines {
            viewers.insert(pipeline.name.clone(), group_viewers.clone());
        }
    }
    viewers
}

fn group_viewers(group: &PipelineGroup, admins: &AccessList) -> Viewers {
    let Some(authorization) = &group.authorization else {
        return Viewers::Everyone;
    };
    Viewers::Allowed {
        users: authorization
            .view
            .users
            .union(&admins.users)
            .cloned()
            .collect(),
        roles: authorization
            .view
            .roles
            .union(&admins.roles)
            .cloned()
            .collect(),
    }
}

/// Authority backed by the most recently applied configuration.
#[derive(Debug, Default)]
pub struct ConfigPermissionsAuthority {
    viewers: RwLock<HashMap<CaseInsensitiveName, Viewers>>,
}

impl ConfigPermissionsAuthority {
    pub fn new(config: &CruiseConfig) -> Self {
        Self {
            viewers: RwLock::new(compute_viewers(config)),
        }
    }

    /// Recompute from `config`. Call before reconciling against it.
    pub fn update(&self, config: &CruiseConfig) {
        let computed = compute_viewers(config);
        *self.viewers.write().unwrap_or_else(PoisonError::into_inner) = computed;
    }
}

impl PermissionsAuthority for ConfigPermissionsAuthority {
    fn viewers_for_all_pipelines(&self) -> HashMap<CaseInsensitiveName, Viewers> {
        self.viewers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn viewers_for_pipeline(&self, pipeline: &CaseInsensitiveName) -> Option<Viewers> {
        self.viewers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(pipeline)
            .cloned()
    }
}
