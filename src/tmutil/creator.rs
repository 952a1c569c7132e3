//! Snapshot creation and release for the `tmutil` backuper

use chrono::Utc;
use std::path::PathBuf;
use tracing::warn;
use uuid::Uuid;

use super::{list_mount_points, parse_created_date, parse_snapshot_date, snapshot_name};
use crate::backup::{CreatedSnapshot, SnapshotCreator};
use crate::error::Result;
use crate::info::{InfoCallback, MessageLevel};
use crate::model::Snapshot;
use crate::process::{run, run_and_capture};

/// Creates a local snapshot and mounts it under a temporary directory
pub struct TmutilCreator {
    info: InfoCallback,
}

impl TmutilCreator {
    pub fn new(info: InfoCallback) -> Self {
        TmutilCreator { info }
    }
}

impl SnapshotCreator for TmutilCreator {
    fn case_sensitive(&self) -> bool {
        true
    }

    fn list_mount_points(&self, _volume: &str) -> Result<Vec<String>> {
        list_mount_points(&self.info)
    }

    fn create_snapshot(&self, mount_point: &str) -> Result<CreatedSnapshot> {
        let output = run_and_capture(&self.info, "tmutil", &localsnapshot_args(mount_point))?;
        let date = parse_created_date(&output)?;

        // From here on everything acquired is undone when the lease drops
        let mut lease = TmutilLease {
            info: self.info.clone(),
            date: Some(date.clone()),
            dir: None,
            mounted: false,
        };

        let dir = std::env::temp_dir().join(format!("fs_snapshot_{}", Uuid::new_v4().simple()));
        std::fs::create_dir(&dir)?;
        lease.dir = Some(dir.clone());

        let dir_text = dir.to_string_lossy().to_string();
        run(
            &self.info,
            "mount_apfs",
            &["-o", "ro", "-s", &snapshot_name(&date), mount_point, &dir_text],
        )?;
        lease.mounted = true;

        let snapshot = Snapshot {
            id: snapshot_name(&date),
            original_path: mount_point.to_string(),
            snapshot_path: dir_text,
            creation_time: parse_snapshot_date(&date).unwrap_or_else(|_| Utc::now()),
            set: None,
            provider: None,
            state: "created".to_string(),
            attributes: String::new(),
        };

        Ok(CreatedSnapshot::new(snapshot, lease))
    }
}

/// `tmutil localsnapshot` scoped to the volume being backed up
fn localsnapshot_args(mount_point: &str) -> [&str; 2] {
    ["localsnapshot", mount_point]
}

/// Unmounts, removes the mount directory and deletes the local snapshot
struct TmutilLease {
    info: InfoCallback,
    date: Option<String>,
    dir: Option<PathBuf>,
    mounted: bool,
}

impl TmutilLease {
    fn report(&self, what: &str, err: impl std::fmt::Display) {
        warn!("Error {}: {}", what, err);
        (self.info)(MessageLevel::Info, &format!("Error {}: {}", what, err));
    }
}

impl Drop for TmutilLease {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            let text = dir.to_string_lossy().to_string();

            if self.mounted {
                if let Err(e) = run(&self.info, "umount", &[&text]) {
                    self.report(&format!("unmounting {}", text), e);
                }
            }

            if let Err(e) = std::fs::remove_dir(&dir) {
                self.report(&format!("removing {}", text), e);
            }
        }

        if let Some(date) = self.date.take() {
            if let Err(e) = run(&self.info, "tmutil", &["deletelocalsnapshots", &date]) {
                self.report(&format!("deleting local snapshot {}", date), e);
            }
        }
    }
}
