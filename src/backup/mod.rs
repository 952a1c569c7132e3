//! Backup sessions
//!
//! A [`Backuper`] hands out snapshot paths for directories, creating at
//! most one native snapshot per mount point and reusing it for every
//! directory underneath. All snapshots are released when the session is
//! closed.

mod base;
mod null;
mod registry;

pub use base::BaseBackuper;
pub use null::NullBackuper;
pub use registry::{MountPoint, MountPointRegistry, MountPointState};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::model::Snapshot;

/// A backup session handing out temporary snapshot paths
///
/// A single session object is not meant to be driven by several callers
/// at once, but sessions sharing a [`MountPointRegistry`] may run
/// concurrently.
pub trait Backuper: Send + Sync {
    /// Path inside a snapshot that mirrors `dir`, creating the snapshot
    /// if the directory's mount point has none yet
    ///
    /// On error the caller should keep reading from `dir` itself.
    fn try_to_create_temporary_snapshot(&self, dir: &Path) -> Result<PathBuf>;

    /// Original mount point path -> snapshot path, for diagnostics
    fn list_snapshoted_directories(&self) -> BTreeMap<String, String>;

    /// Whether paths are compared case-sensitively
    fn case_sensitive(&self) -> bool;

    /// Release every snapshot this session created
    fn close(&self);
}

/// Native resources backing a created snapshot; dropping them releases
/// the snapshot
pub trait Lease: Send + Sync {}

impl<T: Send + Sync> Lease for T {}

/// A snapshot together with whatever keeps it alive
pub struct CreatedSnapshot {
    pub snapshot: Snapshot,
    lease: Option<Box<dyn Lease>>,
}

impl CreatedSnapshot {
    pub fn new(snapshot: Snapshot, lease: impl Lease + 'static) -> Self {
        CreatedSnapshot {
            snapshot,
            lease: Some(Box::new(lease)),
        }
    }

    /// A snapshot owned by someone else (e.g. the snapshot server)
    pub fn unowned(snapshot: Snapshot) -> Self {
        CreatedSnapshot {
            snapshot,
            lease: None,
        }
    }

    pub fn is_owned(&self) -> bool {
        self.lease.is_some()
    }
}

/// Platform-specific snapshot creation used by [`BaseBackuper`]
pub trait SnapshotCreator: Send + Sync {
    /// Whether the platform treats paths case-sensitively
    fn case_sensitive(&self) -> bool;

    /// Mount points of `volume`, including the volume root
    fn list_mount_points(&self, volume: &str) -> Result<Vec<String>>;

    /// Create a snapshot of the mount point at `mount_point`
    fn create_snapshot(&self, mount_point: &str) -> Result<CreatedSnapshot>;
}
