//! Time Machine local snapshots driven through `tmutil`
//!
//! Snapshots are listed per APFS snapshot mount point, created with
//! `tmutil localsnapshot` and mounted read-only with `mount_apfs`. The
//! parsing helpers are platform independent; the snapshoter itself is
//! only selected on macOS.

mod creator;

pub use creator::TmutilCreator;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::backup::{BaseBackuper, Backuper};
use crate::error::{Error, Result};
use crate::info::InfoCallback;
use crate::model::{BackupConfig, Provider, Snapshot, SnapshotSet};
use crate::process::{run, run_and_capture};
use crate::snapshoter::ids::resolve_unique;
use crate::snapshoter::Snapshoter;

pub const PROVIDER_ID: &str = "tmutil-local";
const PROVIDER_NAME: &str = "Time Machine local snapshots";
const PROVIDER_TYPE: &str = "console application";

const ID_PREFIX: &str = "com.apple.TimeMachine.";
const ID_SUFFIX: &str = ".local";
const DATE_FORMAT: &str = "%Y-%m-%d-%H%M%S";

/// Snapshot name of a `tmutil` snapshot date
pub fn snapshot_name(date: &str) -> String {
    format!("{}{}{}", ID_PREFIX, date, ID_SUFFIX)
}

/// Date part of a snapshot name
pub fn simplify_name(id: &str) -> String {
    let id = id.strip_prefix(ID_PREFIX).unwrap_or(id);
    id.strip_suffix(ID_SUFFIX).unwrap_or(id).to_string()
}

/// Version string from `tmutil version` output
pub fn parse_version(output: &str) -> Result<String> {
    let re = Regex::new(r"tmutil version ([0-9a-zA-Z_.]+)").map_err(Error::custom)?;
    re.captures(output)
        .map(|c| c[1].to_string())
        .ok_or_else(|| Error::Unsupported(format!("unknown tmutil version: {}", output)))
}

/// Snapshot mount points from `diskutil apfs list` output
pub fn parse_mount_points(output: &str) -> Result<Vec<String>> {
    let re = Regex::new(r"Snapshot Mount Point: +(/[^\r\n]*)").map_err(Error::custom)?;
    Ok(re
        .captures_iter(output)
        .map(|c| c[1].trim_end().to_string())
        .collect())
}

/// Snapshot date from `tmutil localsnapshot` output
pub fn parse_created_date(output: &str) -> Result<String> {
    let re = Regex::new(r"Created local snapshot with date: ([0-9-]+)").map_err(Error::custom)?;
    re.captures(output)
        .map(|c| c[1].to_string())
        .ok_or_else(|| Error::Process {
            program: "tmutil".into(),
            output: format!("unknown tmutil output: {}", output),
        })
}

/// Creation time encoded in a snapshot date, read as local time
pub fn parse_snapshot_date(date: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(date, DATE_FORMAT)
        .map_err(|e| Error::custom(format!("invalid snapshot date {}: {}", date, e)))?;

    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| Error::custom(format!("nonexistent local time {}", date)))
}

/// Snapshot names from `tmutil listlocalsnapshots <mount>` output; the
/// first line is a header
pub fn parse_snapshot_names(output: &str) -> Vec<String> {
    output
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Snapshoter running the Time Machine command line tools
pub struct TmutilSnapshoter {
    info: InfoCallback,
    provider: Arc<Provider>,
}

impl TmutilSnapshoter {
    /// Fails if `tmutil` is not available
    pub fn new(info: InfoCallback) -> Result<Self> {
        let output = run_and_capture(&info, "tmutil", &["version"])?;
        let version = parse_version(&output)?;

        Ok(TmutilSnapshoter {
            info,
            provider: Arc::new(Provider {
                id: PROVIDER_ID.to_string(),
                name: PROVIDER_NAME.to_string(),
                version,
                provider_type: PROVIDER_TYPE.to_string(),
            }),
        })
    }

    fn mount_points(&self) -> Result<Vec<String>> {
        list_mount_points(&self.info)
    }
}

fn list_mount_points(info: &InfoCallback) -> Result<Vec<String>> {
    let output = run_and_capture(info, "diskutil", &["apfs", "list"])?;
    parse_mount_points(&output)
}

impl Snapshoter for TmutilSnapshoter {
    fn list_providers(&self, filter_id: &str) -> Result<Vec<Provider>> {
        if !filter_id.is_empty() && filter_id != self.provider.id {
            return Ok(Vec::new());
        }
        Ok(vec![(*self.provider).clone()])
    }

    fn list_sets(&self, _filter_id: &str) -> Result<Vec<SnapshotSet>> {
        Ok(Vec::new())
    }

    fn list_snapshots(&self, filter_id: &str) -> Result<Vec<Snapshot>> {
        let mut result = Vec::new();

        for mount_point in self.mount_points()? {
            let output = run_and_capture(&self.info, "tmutil", &["listlocalsnapshots", &mount_point])?;

            for name in parse_snapshot_names(&output) {
                let date = simplify_name(&name);
                if !filter_id.is_empty() && name != filter_id && date != filter_id {
                    continue;
                }

                result.push(Snapshot {
                    creation_time: parse_snapshot_date(&date)?,
                    id: name,
                    original_path: mount_point.clone(),
                    snapshot_path: String::new(),
                    set: None,
                    provider: Some(self.provider.clone()),
                    state: "created".to_string(),
                    attributes: String::new(),
                });
            }
        }

        Ok(result)
    }

    fn simplify_id(&self, id: &str) -> String {
        simplify_name(id)
    }

    fn delete_set(&self, _id: &str, _force: bool) -> Result<bool> {
        Err(Error::Unsupported("snapshot sets not supported in macOS".into()))
    }

    fn delete_snapshot(&self, id: &str, _force: bool) -> Result<bool> {
        let matches = distinct_names(self.list_snapshots(id)?);

        // A full name that is gone was already deleted
        if matches.is_empty() && id.starts_with(ID_PREFIX) {
            return Ok(false);
        }

        let name = resolve_unique("snapshot", id, matches)?;
        run(&self.info, "tmutil", &["deletelocalsnapshots", &simplify_name(&name)])?;
        Ok(true)
    }

    fn list_mount_points(&self, _volume: &str) -> Result<Vec<String>> {
        self.mount_points()
    }

    fn start_backup(&self, config: BackupConfig) -> Result<Box<dyn Backuper>> {
        if !config.provider_id.is_empty() && config.provider_id != PROVIDER_ID {
            return Err(Error::UnknownId {
                kind: "provider",
                id: config.provider_id,
            });
        }

        let info = config.info_callback.unwrap_or_else(|| self.info.clone());
        let creator = TmutilCreator::new(info.clone());

        Ok(Box::new(BaseBackuper::new(creator, info)))
    }

    fn close(&self) {}
}

/// Snapshot names without repeats; every APFS mount lists the same snapshots
fn distinct_names(snapshots: Vec<Snapshot>) -> Vec<String> {
    snapshots
        .into_iter()
        .map(|s| s.id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
