//! # statusfeed-sync
//!
//! Status cache synchronization.
//!
//! Build a [`SyncEngine`] over a shared [`StatusStore`], a [`HistoryStore`]
//! and a [`PermissionsAuthority`], then call
//! [`SyncEngine::on_full_configuration_change`] or
//! [`SyncEngine::on_pipeline_configuration_change`] whenever the structural
//! configuration changes. Feed readers call [`StatusStore::snapshot`] or
//! [`StatusStore::snapshot_visible_to`].

pub mod annotator;
pub mod engine;
pub mod error;
pub mod history;
pub mod permissions;
pub mod progress;
pub mod resolver;
pub mod store;

pub use engine::{CommitMode, SyncEngine, SyncReport, SyncScope};
pub use error::SyncError;
pub use history::{EmptyHistory, HistoryStore, JsonHistoryStore};
pub use permissions::{ConfigPermissionsAuthority, PermissionsAuthority};
pub use progress::{ProgressEvent, ProgressOutcome};
pub use resolver::{ResolvedFrom, StageGroup, StageGroupResolver};
pub use store::StatusStore;
