//! Domain objects to and from their wire form

use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use super::wire::{WireProvider, WireSet, WireSetInfo, WireSnapshot, WireTime};
use crate::error::{Error, Result};
use crate::model::{Provider, SetInfo, Snapshot, SnapshotSet};

fn time_to_wire(t: DateTime<Utc>) -> WireTime {
    WireTime {
        secs: t.timestamp(),
        nanos: t.timestamp_subsec_nanos(),
    }
}

fn time_from_wire(t: WireTime) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(t.secs, t.nanos)
        .single()
        .ok_or_else(|| Error::Protocol(format!("timestamp out of range: {}s {}ns", t.secs, t.nanos)))
}

pub fn provider_to_wire(p: &Provider) -> WireProvider {
    WireProvider {
        id: p.id.clone(),
        name: p.name.clone(),
        version: p.version.clone(),
        provider_type: p.provider_type.clone(),
    }
}

pub fn provider_from_wire(p: WireProvider) -> Provider {
    Provider {
        id: p.id,
        name: p.name,
        version: p.version,
        provider_type: p.provider_type,
    }
}

fn set_info_to_wire(s: &SetInfo) -> WireSetInfo {
    WireSetInfo {
        id: s.id.clone(),
        creation_time: time_to_wire(s.creation_time),
        snapshot_count_on_creation: s.snapshot_count_on_creation,
    }
}

fn set_info_from_wire(s: WireSetInfo) -> Result<SetInfo> {
    Ok(SetInfo {
        id: s.id,
        creation_time: time_from_wire(s.creation_time)?,
        snapshot_count_on_creation: s.snapshot_count_on_creation,
    })
}

/// `include_set` is false for snapshots nested in a set
pub fn snapshot_to_wire(s: &Snapshot, include_set: bool) -> WireSnapshot {
    WireSnapshot {
        id: s.id.clone(),
        original_path: s.original_path.clone(),
        snapshot_path: s.snapshot_path.clone(),
        creation_time: time_to_wire(s.creation_time),
        set: if include_set {
            s.set.as_deref().map(set_info_to_wire)
        } else {
            None
        },
        provider: s.provider.as_deref().map(provider_to_wire),
        state: s.state.clone(),
        attributes: s.attributes.clone(),
    }
}

pub fn set_to_wire(s: &SnapshotSet) -> WireSet {
    WireSet {
        info: set_info_to_wire(&s.info),
        snapshots: s.snapshots.iter().map(|snap| snapshot_to_wire(snap, false)).collect(),
    }
}

/// Rebuilds shared `Arc`s for sets and providers repeated across a reply
#[derive(Default)]
struct Interner {
    sets: HashMap<String, Arc<SetInfo>>,
    providers: HashMap<String, Arc<Provider>>,
}

impl Interner {
    fn set(&mut self, info: WireSetInfo) -> Result<Arc<SetInfo>> {
        if let Some(set) = self.sets.get(&info.id) {
            return Ok(set.clone());
        }
        let set = Arc::new(set_info_from_wire(info)?);
        self.sets.insert(set.id.clone(), set.clone());
        Ok(set)
    }

    fn provider(&mut self, p: WireProvider) -> Arc<Provider> {
        self.providers
            .entry(p.id.clone())
            .or_insert_with(|| Arc::new(provider_from_wire(p)))
            .clone()
    }

    fn snapshot(&mut self, s: WireSnapshot, set: Option<Arc<SetInfo>>) -> Result<Snapshot> {
        let set = match (set, s.set) {
            (Some(set), _) => Some(set),
            (None, Some(info)) => Some(self.set(info)?),
            (None, None) => None,
        };

        Ok(Snapshot {
            id: s.id,
            original_path: s.original_path,
            snapshot_path: s.snapshot_path,
            creation_time: time_from_wire(s.creation_time)?,
            set,
            provider: s.provider.map(|p| self.provider(p)),
            state: s.state,
            attributes: s.attributes,
        })
    }
}

/// Snapshots of one reply; those of the same set share one [`SetInfo`]
pub fn snapshots_from_wire(snapshots: Vec<WireSnapshot>) -> Result<Vec<Snapshot>> {
    let mut interner = Interner::default();
    snapshots
        .into_iter()
        .map(|s| interner.snapshot(s, None))
        .collect()
}

/// Sets of one reply, every member linked back to its set
pub fn sets_from_wire(sets: Vec<WireSet>) -> Result<Vec<SnapshotSet>> {
    let mut interner = Interner::default();
    sets.into_iter()
        .map(|s| {
            let info = interner.set(s.info)?;
            let snapshots = s
                .snapshots
                .into_iter()
                .map(|snap| interner.snapshot(snap, Some(info.clone())))
                .collect::<Result<Vec<_>>>()?;
            Ok(SnapshotSet { info, snapshots })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(id: &str, set: &Arc<SetInfo>, provider: &Arc<Provider>) -> Snapshot {
        Snapshot {
            id: id.to_string(),
            original_path: "C:\\".to_string(),
            snapshot_path: format!("\\\\?\\GLOBALROOT\\Device\\{}", id),
            creation_time: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            set: Some(set.clone()),
            provider: Some(provider.clone()),
            state: "created".to_string(),
            attributes: "".to_string(),
        }
    }

    fn fixtures() -> (Arc<SetInfo>, Arc<Provider>) {
        let set = Arc::new(SetInfo {
            id: "set-a".to_string(),
            creation_time: Utc.with_ymd_and_hms(2024, 5, 1, 11, 59, 59).unwrap(),
            snapshot_count_on_creation: 2,
        });
        let provider = Arc::new(Provider {
            id: "prov".to_string(),
            name: "Provider".to_string(),
            version: "1.0".to_string(),
            provider_type: "system".to_string(),
        });
        (set, provider)
    }

    #[test]
    fn test_snapshots_of_one_set_share_set_info() {
        let (set, provider) = fixtures();
        let wire = vec![
            snapshot_to_wire(&snapshot("s1", &set, &provider), true),
            snapshot_to_wire(&snapshot("s2", &set, &provider), true),
        ];

        let snapshots = snapshots_from_wire(wire).unwrap();

        let a = snapshots[0].set.as_ref().unwrap();
        let b = snapshots[1].set.as_ref().unwrap();
        assert!(Arc::ptr_eq(a, b));
        assert_eq!(**a, *set);
        assert!(Arc::ptr_eq(
            snapshots[0].provider.as_ref().unwrap(),
            snapshots[1].provider.as_ref().unwrap()
        ));
    }

    #[test]
    fn test_set_members_link_back_to_set() {
        let (set, provider) = fixtures();
        let local = SnapshotSet {
            info: set.clone(),
            snapshots: vec![snapshot("s1", &set, &provider), snapshot("s2", &set, &provider)],
        };

        let wire = set_to_wire(&local);
        assert!(wire.snapshots.iter().all(|s| s.set.is_none()));

        let sets = sets_from_wire(vec![wire]).unwrap();

        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].id(), "set-a");
        assert_eq!(sets[0].creation_time(), set.creation_time);
        for member in &sets[0].snapshots {
            assert!(Arc::ptr_eq(member.set.as_ref().unwrap(), &sets[0].info));
        }
    }

    #[test]
    fn test_snapshot_without_set() {
        let wire = WireSnapshot {
            id: "com.apple.TimeMachine.2024-05-01-120000.local".to_string(),
            original_path: "/".to_string(),
            snapshot_path: String::new(),
            creation_time: WireTime { secs: 0, nanos: 0 },
            set: None,
            provider: None,
            state: "created".to_string(),
            attributes: String::new(),
        };

        let snapshots = snapshots_from_wire(vec![wire]).unwrap();

        assert!(snapshots[0].set.is_none());
        assert_eq!(snapshots[0].creation_time.timestamp(), 0);
    }

    #[test]
    fn test_creation_time_keeps_sub_second_precision() {
        let (set, provider) = fixtures();
        let mut local = snapshot("s1", &set, &provider);
        local.creation_time = Utc.timestamp_opt(1_714_564_800, 123_456_789).unwrap();

        let snapshots = snapshots_from_wire(vec![snapshot_to_wire(&local, true)]).unwrap();

        assert_eq!(snapshots[0].creation_time, local.creation_time);
        assert_eq!(snapshots[0].creation_time.timestamp_subsec_nanos(), 123_456_789);
    }

    #[test]
    fn test_out_of_range_time_is_protocol_error() {
        let (set, provider) = fixtures();
        let mut wire = snapshot_to_wire(&snapshot("s1", &set, &provider), true);
        wire.creation_time = WireTime { secs: i64::MAX, nanos: 0 };

        let err = snapshots_from_wire(vec![wire.clone()]).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));

        // A bad set timestamp fails the whole reply instead of decoding as the epoch
        wire.creation_time = WireTime { secs: 0, nanos: 0 };
        wire.set.as_mut().unwrap().creation_time = WireTime { secs: 0, nanos: 2_000_000_000 };
        assert!(matches!(snapshots_from_wire(vec![wire]), Err(Error::Protocol(_))));
    }
}
