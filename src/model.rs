//! Snapshot domain objects shared by every snapshoter implementation

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::info::InfoCallback;

/// Default wall-clock budget for a whole native snapshot transaction
pub const DEFAULT_BACKUP_TIMEOUT: Duration = Duration::from_secs(120);

/// A snapshot engine variant (VSS provider, tmutil, ...)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provider {
    pub id: String,
    pub name: String,
    pub version: String,
    pub provider_type: String,
}

/// Identity of a snapshot set, shared by all its member snapshots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetInfo {
    pub id: String,
    /// Earliest creation time among the member snapshots
    pub creation_time: DateTime<Utc>,
    /// Number of volumes in the set when it was created
    pub snapshot_count_on_creation: u32,
}

/// A transactional group of snapshots created together
#[derive(Debug, Clone)]
pub struct SnapshotSet {
    pub info: Arc<SetInfo>,
    pub snapshots: Vec<Snapshot>,
}

impl SnapshotSet {
    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.info.creation_time
    }
}

/// A single point-in-time snapshot of one volume
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub id: String,
    /// Mount path(s) of the snapshotted volume, comma separated
    pub original_path: String,
    /// Device or mount path where the frozen view can be read
    pub snapshot_path: String,
    pub creation_time: DateTime<Utc>,
    pub set: Option<Arc<SetInfo>>,
    pub provider: Option<Arc<Provider>>,
    pub state: String,
    pub attributes: String,
}

impl Snapshot {
    /// Id of the owning set, if the platform groups snapshots into sets
    pub fn set_id(&self) -> Option<&str> {
        self.set.as_deref().map(|s| s.id.as_str())
    }
}

/// Options for a backup session
#[derive(Clone)]
pub struct BackupConfig {
    /// Provider to use; empty selects the platform default. Short ids are accepted.
    pub provider_id: String,

    /// Budget for each native snapshot transaction
    pub timeout: Duration,

    /// Skip writer coordination (file-share-only context on Windows)
    pub simple: bool,

    /// Where progress for this session goes; `None` uses the snapshoter's callback
    pub info_callback: Option<InfoCallback>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        BackupConfig {
            provider_id: String::new(),
            timeout: DEFAULT_BACKUP_TIMEOUT,
            simple: false,
            info_callback: None,
        }
    }
}

impl std::fmt::Debug for BackupConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupConfig")
            .field("provider_id", &self.provider_id)
            .field("timeout", &self.timeout)
            .field("simple", &self.simple)
            .finish()
    }
}
