//! Id shortening, filtering and resolution
//!
//! Listing operations accept an empty filter (everything), a full id, or
//! the shortened form produced by [`simplify_guid`]. Operations that act on
//! a single entity resolve the filter to exactly one match.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{Provider, SetInfo, Snapshot, SnapshotSet};

/// Number of hex digits kept by [`simplify_guid`]
pub const SIMPLE_ID_LENGTH: usize = 7;

/// Lowercase hyphenated form used for every GUID shown to users
pub fn format_guid(id: &Uuid) -> String {
    id.hyphenated().to_string()
}

/// Whether `id` is a complete GUID (with or without braces)
pub fn parse_full_guid(id: &str) -> Option<Uuid> {
    Uuid::parse_str(id.trim_start_matches('{').trim_end_matches('}')).ok()
}

/// First hex digits of a GUID. Cosmetic only: two ids may share it.
pub fn simplify_guid(id: &str) -> String {
    id.chars()
        .filter(|c| !matches!(c, '-' | '{' | '}'))
        .take(SIMPLE_ID_LENGTH)
        .collect::<String>()
        .to_lowercase()
}

/// Whether an entity with `id` passes `filter`
pub fn matches_filter(filter: &str, id: &str, simplify: impl Fn(&str) -> String) -> bool {
    filter.is_empty() || filter.eq_ignore_ascii_case(id) || filter.eq_ignore_ascii_case(&simplify(id))
}

/// The single element of `matches`, or an unknown/ambiguous id error
pub fn resolve_unique<T>(kind: &'static str, id: &str, mut matches: Vec<T>) -> Result<T> {
    match matches.len() {
        0 => Err(Error::UnknownId {
            kind,
            id: id.to_string(),
        }),
        1 => Ok(matches.remove(0)),
        count => Err(Error::AmbiguousId {
            kind,
            id: id.to_string(),
            count,
        }),
    }
}

/// Flat snapshot description waiting to be grouped into its set
#[derive(Debug, Clone)]
pub struct SnapshotRecord {
    pub id: String,
    pub set_id: String,
    pub snapshot_count_on_creation: u32,
    pub original_path: String,
    pub snapshot_path: String,
    pub creation_time: DateTime<Utc>,
    pub provider: Option<Arc<Provider>>,
    pub state: String,
    pub attributes: String,
}

/// Groups snapshot records into sets, with every member of a set pointing
/// at the same [`SetInfo`]
#[derive(Default)]
pub struct SetsBuilder {
    set_order: Vec<String>,
    sets: HashMap<String, (DateTime<Utc>, u32)>,
    records: Vec<SnapshotRecord>,
}

impl SetsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, record: SnapshotRecord) {
        match self.sets.get_mut(&record.set_id) {
            Some((creation_time, _)) => {
                if record.creation_time < *creation_time {
                    *creation_time = record.creation_time;
                }
            }
            None => {
                self.set_order.push(record.set_id.clone());
                self.sets.insert(
                    record.set_id.clone(),
                    (record.creation_time, record.snapshot_count_on_creation),
                );
            }
        }
        self.records.push(record);
    }

    /// Snapshots in insertion order, and sets in order of first appearance
    pub fn build(self) -> (Vec<Snapshot>, Vec<SnapshotSet>) {
        let infos: HashMap<String, Arc<SetInfo>> = self
            .sets
            .into_iter()
            .map(|(id, (creation_time, count))| {
                let info = Arc::new(SetInfo {
                    id: id.clone(),
                    creation_time,
                    snapshot_count_on_creation: count,
                });
                (id, info)
            })
            .collect();

        let snapshots: Vec<Snapshot> = self
            .records
            .into_iter()
            .map(|r| Snapshot {
                set: infos.get(&r.set_id).cloned(),
                id: r.id,
                original_path: r.original_path,
                snapshot_path: r.snapshot_path,
                creation_time: r.creation_time,
                provider: r.provider,
                state: r.state,
                attributes: r.attributes,
            })
            .collect();

        let sets = self
            .set_order
            .iter()
            .filter_map(|id| infos.get(id))
            .map(|info| SnapshotSet {
                info: info.clone(),
                snapshots: snapshots
                    .iter()
                    .filter(|s| s.set_id() == Some(info.id.as_str()))
                    .cloned()
                    .collect(),
            })
            .collect();

        (snapshots, sets)
    }
}
