//! Per-mount-point snapshot state, grouped by volume
//!
//! Two lock levels: the registry lock only guards inserting a volume's
//! mount point map, and each [`MountPoint`] carries its own lock for its
//! state, so unrelated mount points never wait on each other.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::CreatedSnapshot;
use crate::error::Result;
use crate::paths::with_separator_suffix;

/// Lifecycle of a mount point's snapshot. Only Pending -> Success and
/// Pending -> Failed transitions happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountPointState {
    Pending,
    Success,
    Failed,
}

pub(crate) struct Slot {
    pub(crate) state: MountPointState,
    pub(crate) snapshot: Option<CreatedSnapshot>,
}

/// A filesystem attachment point that can be snapshotted on its own
pub struct MountPoint {
    path: String,
    pub(crate) slot: RwLock<Slot>,
}

impl MountPoint {
    fn new(path: String) -> Self {
        MountPoint {
            path,
            slot: RwLock::new(Slot {
                state: MountPointState::Pending,
                snapshot: None,
            }),
        }
    }

    /// Normalized path, always ending with a separator
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn state(&self) -> MountPointState {
        self.slot.read().state
    }

    /// Snapshot path once the snapshot was created
    pub fn snapshot_path(&self) -> Option<String> {
        self.slot
            .read()
            .snapshot
            .as_ref()
            .map(|s| s.snapshot.snapshot_path.clone())
    }
}

impl std::fmt::Debug for MountPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountPoint")
            .field("path", &self.path)
            .field("state", &self.state())
            .finish()
    }
}

/// Volume key -> (normalized path -> mount point)
pub struct MountPointRegistry {
    case_sensitive: bool,
    volumes: RwLock<HashMap<String, HashMap<String, Arc<MountPoint>>>>,
}

impl MountPointRegistry {
    pub fn new(case_sensitive: bool) -> Self {
        MountPointRegistry {
            case_sensitive,
            volumes: RwLock::new(HashMap::new()),
        }
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Normalize a directory the way mount point keys are normalized
    pub fn normalize(&self, path: &str) -> String {
        let path = with_separator_suffix(path);
        if self.case_sensitive {
            path
        } else {
            path.to_lowercase()
        }
    }

    fn volume_key(&self, volume: &str) -> String {
        if self.case_sensitive {
            volume.to_string()
        } else {
            volume.to_lowercase()
        }
    }

    /// Register a volume's mount points, once per volume key
    ///
    /// Only the first caller for a key has its listing stored. Concurrent
    /// first callers may both list, but the map is inserted only once.
    pub fn add_volume<F>(&self, volume: &str, list_mount_points: F) -> Result<()>
    where
        F: FnOnce(&str) -> Result<Vec<String>>,
    {
        let key = self.volume_key(volume);

        if self.volumes.read().contains_key(&key) {
            return Ok(());
        }

        let listed = list_mount_points(volume)?;
        let mut mount_points = HashMap::with_capacity(listed.len());
        for path in listed {
            let path = self.normalize(&path);
            mount_points
                .entry(path.clone())
                .or_insert_with(|| Arc::new(MountPoint::new(path)));
        }

        let mut volumes = self.volumes.write();
        volumes.entry(key).or_insert(mount_points);

        Ok(())
    }

    /// Deepest registered mount point containing `dir`
    pub fn get_mount_point(&self, volume: &str, dir: &str) -> Option<Arc<MountPoint>> {
        let dir = self.normalize(dir);
        let volumes = self.volumes.read();

        volumes
            .get(&self.volume_key(volume))?
            .values()
            .filter(|m| dir.starts_with(m.path()))
            .max_by_key(|m| m.path().len())
            .cloned()
    }

    /// Every registered mount point, across volumes
    pub fn mount_points(&self) -> Vec<Arc<MountPoint>> {
        self.volumes
            .read()
            .values()
            .flat_map(|v| v.values().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn windows_lister(_: &str) -> Result<Vec<String>> {
        Ok(vec![r"C:\".to_string(), r"C:\mnt\".to_string()])
    }

    #[test]
    fn test_longest_prefix_wins() {
        let registry = MountPointRegistry::new(true);
        registry.add_volume("C", windows_lister).unwrap();

        let root = registry.get_mount_point("C", r"C:\a\b").unwrap();
        assert_eq!(root.path(), r"C:\");

        let nested = registry.get_mount_point("C", r"C:\mnt\x").unwrap();
        assert_eq!(nested.path(), r"C:\mnt\");
    }

    #[test]
    fn test_mount_point_itself_resolves_to_itself() {
        let registry = MountPointRegistry::new(true);
        registry.add_volume("C", windows_lister).unwrap();

        assert_eq!(registry.get_mount_point("C", r"C:\mnt").unwrap().path(), r"C:\mnt\");
    }

    #[test]
    fn test_unregistered_volume_has_no_mount_point() {
        let registry = MountPointRegistry::new(true);
        assert!(registry.get_mount_point("D", r"D:\x").is_none());
    }

    #[test]
    fn test_sibling_prefix_is_not_a_match() {
        let registry = MountPointRegistry::new(true);
        registry
            .add_volume("", |_| Ok(vec!["/data".to_string()]))
            .unwrap();

        assert!(registry.get_mount_point("", "/database/x").is_none());
        assert!(registry.get_mount_point("", "/data/x").is_some());
    }

    #[test]
    fn test_add_volume_lists_once() {
        let registry = MountPointRegistry::new(false);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            registry
                .add_volume("C:", |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![r"C:\".to_string()])
                })
                .unwrap();
        }
        // volume keys are case-folded for case-insensitive registries
        registry
            .add_volume("c:", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(vec![])
            })
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.mount_points().len(), 1);
    }

    #[test]
    fn test_new_mount_points_are_pending() {
        let registry = MountPointRegistry::new(true);
        registry.add_volume("C", windows_lister).unwrap();

        for m in registry.mount_points() {
            assert_eq!(m.state(), MountPointState::Pending);
            assert!(m.snapshot_path().is_none());
        }
    }

    #[test]
    fn test_failed_listing_registers_nothing() {
        let registry = MountPointRegistry::new(true);
        let err = registry.add_volume("C", |_| Err(crate::Error::custom("boom")));
        assert!(err.is_err());

        registry.add_volume("C", windows_lister).unwrap();
        assert_eq!(registry.mount_points().len(), 2);
    }

    #[test]
    fn test_concurrent_first_callers_insert_once() {
        let registry = Arc::new(MountPointRegistry::new(true));

        std::thread::scope(|s| {
            for _ in 0..8 {
                let registry = registry.clone();
                s.spawn(move || registry.add_volume("C", windows_lister).unwrap());
            }
        });

        assert_eq!(registry.mount_points().len(), 2);
    }
}
