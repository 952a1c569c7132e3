use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::Backuper;
use crate::error::Result;

/// Backuper for platforms without snapshot support: every directory is
/// its own "snapshot"
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBackuper;

impl Backuper for NullBackuper {
    fn try_to_create_temporary_snapshot(&self, dir: &Path) -> Result<PathBuf> {
        Ok(dir.to_path_buf())
    }

    fn list_snapshoted_directories(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn case_sensitive(&self) -> bool {
        cfg!(not(windows))
    }

    fn close(&self) {}
}
