use crate::backup::{Backuper, NullBackuper};
use crate::error::Result;
use crate::model::{BackupConfig, Provider, Snapshot, SnapshotSet};

use super::Snapshoter;

/// Snapshoter used where snapshots are unavailable. Lists nothing,
/// deletes nothing and hands out [`NullBackuper`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSnapshoter;

impl Snapshoter for NullSnapshoter {
    fn list_providers(&self, _filter_id: &str) -> Result<Vec<Provider>> {
        Ok(Vec::new())
    }

    fn list_sets(&self, _filter_id: &str) -> Result<Vec<SnapshotSet>> {
        Ok(Vec::new())
    }

    fn list_snapshots(&self, _filter_id: &str) -> Result<Vec<Snapshot>> {
        Ok(Vec::new())
    }

    fn simplify_id(&self, id: &str) -> String {
        id.to_string()
    }

    fn delete_set(&self, _id: &str, _force: bool) -> Result<bool> {
        Ok(false)
    }

    fn delete_snapshot(&self, _id: &str, _force: bool) -> Result<bool> {
        Ok(false)
    }

    fn list_mount_points(&self, _volume: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn start_backup(&self, _config: BackupConfig) -> Result<Box<dyn Backuper>> {
        Ok(Box::new(NullBackuper))
    }

    fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_behaves_like_an_empty_platform() {
        let snapshoter = NullSnapshoter;

        assert!(snapshoter.list_snapshots("").unwrap().is_empty());
        assert!(!snapshoter.delete_snapshot("abc", true).unwrap());

        let backuper = snapshoter.start_backup(BackupConfig::default()).unwrap();
        let dir = Path::new("/data");
        assert_eq!(backuper.try_to_create_temporary_snapshot(dir).unwrap(), dir);
        backuper.close();
    }
}
