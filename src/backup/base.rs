//! Get-or-create snapshot orchestration shared by every backuper

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::registry::{MountPoint, MountPointRegistry, MountPointState, Slot};
use super::{Backuper, SnapshotCreator};
use crate::error::{Error, Result};
use crate::info::{InfoCallback, MessageLevel};
use crate::model::Snapshot;
use crate::paths::{absolute_path, change_base_dir, volume_name, with_separator_suffix};

/// Backuper built on a [`SnapshotCreator`]
///
/// Native snapshot creation runs while the mount point's write lock is
/// held, so concurrent requests for the same mount point wait for the
/// first one and reuse its result instead of creating their own.
pub struct BaseBackuper<C> {
    creator: C,
    /// `None` once the session is closed
    registry: Mutex<Option<Arc<MountPointRegistry>>>,
    /// Snapshots this session created
    created: Mutex<Vec<Snapshot>>,
    info: InfoCallback,
}

impl<C: SnapshotCreator> BaseBackuper<C> {
    /// Session with a registry of its own
    pub fn new(creator: C, info: InfoCallback) -> Self {
        let registry = Arc::new(MountPointRegistry::new(creator.case_sensitive()));
        Self::with_registry(creator, registry, info)
    }

    /// Session sharing `registry` with other sessions
    pub fn with_registry(creator: C, registry: Arc<MountPointRegistry>, info: InfoCallback) -> Self {
        BaseBackuper {
            creator,
            registry: Mutex::new(Some(registry)),
            created: Mutex::new(Vec::new()),
            info,
        }
    }

    pub fn creator(&self) -> &C {
        &self.creator
    }

    /// Snapshots created by this session so far
    pub fn created_snapshots(&self) -> Vec<Snapshot> {
        self.created.lock().clone()
    }

    fn registry(&self) -> Result<Arc<MountPointRegistry>> {
        self.registry.lock().clone().ok_or(Error::SessionClosed)
    }

    fn snapshot_directory(&self, input: &Path) -> Result<PathBuf> {
        let registry = self.registry()?;

        let dir = absolute_path(input)?;
        let metadata = std::fs::metadata(&dir)?;
        if !metadata.is_dir() {
            return Err(Error::NotADirectory(dir.to_string_lossy().to_string()));
        }

        let dir = registry.normalize(&dir.to_string_lossy());
        let volume = volume_name(&dir);

        registry.add_volume(&volume, |v| self.creator.list_mount_points(v))?;

        let mount_point = registry
            .get_mount_point(&volume, &dir)
            .ok_or_else(|| Error::Internal(format!("no mount point contains {}", dir)))?;

        let snapshot_path = self.get_or_create_snapshot(&mount_point)?;

        let rebased = change_base_dir(&dir, mount_point.path(), &snapshot_path)?;
        Ok(PathBuf::from(with_separator_suffix(&rebased.to_string_lossy())))
    }

    fn get_or_create_snapshot(&self, mount_point: &MountPoint) -> Result<String> {
        // Read lock first so finished mount points never block each other
        if let Some(result) = cached_result(&mount_point.slot.read()) {
            return result;
        }

        let mut slot = mount_point.slot.write();

        // Someone may have finished while we waited for the write lock
        if let Some(result) = cached_result(&slot) {
            return result;
        }

        (self.info)(
            MessageLevel::Details,
            &format!("Creating snapshot of {}", mount_point.path()),
        );

        match self.creator.create_snapshot(mount_point.path()) {
            Ok(created) => {
                let path = created.snapshot.snapshot_path.clone();
                self.created.lock().push(created.snapshot.clone());
                slot.snapshot = Some(created);
                slot.state = MountPointState::Success;

                (self.info)(
                    MessageLevel::Details,
                    &format!("Snapshot of {} available at {}", mount_point.path(), path),
                );
                Ok(path)
            }
            Err(e) => {
                slot.state = MountPointState::Failed;
                Err(e)
            }
        }
    }
}

fn cached_result(slot: &Slot) -> Option<Result<String>> {
    match slot.state {
        MountPointState::Pending => None,
        MountPointState::Failed => Some(Err(Error::SnapshotFailedInPreviousAttempt)),
        MountPointState::Success => Some(
            slot.snapshot
                .as_ref()
                .map(|s| s.snapshot.snapshot_path.clone())
                .ok_or_else(|| Error::Internal("successful mount point without snapshot".into())),
        ),
    }
}

impl<C: SnapshotCreator> Backuper for BaseBackuper<C> {
    fn try_to_create_temporary_snapshot(&self, dir: &Path) -> Result<PathBuf> {
        self.snapshot_directory(dir).map_err(|e| {
            debug!("No snapshot for {:?}: {}", dir, e);
            e
        })
    }

    fn list_snapshoted_directories(&self) -> BTreeMap<String, String> {
        let Ok(registry) = self.registry() else {
            return BTreeMap::new();
        };

        registry
            .mount_points()
            .iter()
            .map(|m| {
                let slot = m.slot.read();
                let target = match slot.state {
                    MountPointState::Success => slot
                        .snapshot
                        .as_ref()
                        .map(|s| s.snapshot.snapshot_path.clone())
                        .unwrap_or_default(),
                    MountPointState::Failed => m.path().to_string(),
                    MountPointState::Pending => String::new(),
                };
                (m.path().to_string(), target)
            })
            .collect()
    }

    fn case_sensitive(&self) -> bool {
        self.creator.case_sensitive()
    }

    fn close(&self) {
        let Some(registry) = self.registry.lock().take() else {
            return;
        };

        let created = self.created.lock().len();
        (self.info)(
            MessageLevel::Details,
            &format!("Closing backup session ({} snapshot(s) created)", created),
        );

        // Leases are released when the last session sharing the registry lets go
        drop(registry);
    }
}
