//! Scripted VSS binding for tests

use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::binding::{BackupComponents, ComponentsFactory, ProviderProperties, SnapshotProperties};
use super::types::{BackupType, Context, ObjectType};
use crate::error::{Error, Result};

/// What the fake API does
#[derive(Clone, Default)]
pub struct Script {
    /// Call that fails with `VSS_E_UNEXPECTED`
    pub fail_at: Option<&'static str>,
    /// Call that sleeps before returning
    pub delay_at: Option<(&'static str, Duration)>,
    /// Volumes reported as unsupported
    pub unsupported: Vec<String>,
    pub providers: Vec<ProviderProperties>,
    pub snapshots: Vec<SnapshotProperties>,
    /// Volume GUID path -> mount paths
    pub volume_paths: HashMap<String, Vec<String>>,
    pub mounted_folders: Vec<String>,
}

/// Every call made through any fake created from one factory
#[derive(Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<String>>>,
    timeouts: Arc<Mutex<Vec<(String, Duration)>>>,
}

impl CallLog {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn timeouts(&self) -> Vec<(String, Duration)> {
        self.timeouts.lock().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == name).count()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
        self.timeouts.lock().clear();
    }
}

pub struct FakeComponents {
    script: Script,
    log: CallLog,
    added: Vec<(Uuid, String)>,
    set_id: Option<Uuid>,
}

impl FakeComponents {
    fn call(&mut self, name: &str) -> Result<()> {
        self.log.calls.lock().push(name.to_string());

        if let Some((at, delay)) = self.script.delay_at {
            if at == name {
                std::thread::sleep(delay);
            }
        }

        if self.script.fail_at == Some(name) {
            return Err(Error::Native {
                call: format!("{}()", name),
                name: "VSS_E_UNEXPECTED",
                code: 0x8004_2302,
            });
        }
        Ok(())
    }

    fn call_async(&mut self, name: &str, timeout: Duration) -> Result<()> {
        self.log.timeouts.lock().push((name.to_string(), timeout));
        self.call(name)
    }
}

impl Drop for FakeComponents {
    fn drop(&mut self) {
        self.log.calls.lock().push("Release".to_string());
    }
}

impl BackupComponents for FakeComponents {
    fn initialize_for_backup(&mut self) -> Result<()> {
        self.call("InitializeForBackup")
    }

    fn set_context(&mut self, context: Context) -> Result<()> {
        self.call(&format!("SetContext({})", context))
    }

    fn set_backup_state(&mut self, _: bool, _: bool, _: BackupType, _: bool) -> Result<()> {
        self.call("SetBackupState")
    }

    fn gather_writer_metadata(&mut self, timeout: Duration) -> Result<()> {
        self.call_async("GatherWriterMetadata", timeout)
    }

    fn free_writer_metadata(&mut self) -> Result<()> {
        self.call("FreeWriterMetadata")
    }

    fn is_volume_supported(&mut self, _provider: Option<Uuid>, volume: &str) -> Result<bool> {
        self.call("IsVolumeSupported")?;
        Ok(!self.script.unsupported.iter().any(|v| v == volume))
    }

    fn start_snapshot_set(&mut self) -> Result<Uuid> {
        self.call("StartSnapshotSet")?;
        let id = Uuid::new_v4();
        self.set_id = Some(id);
        Ok(id)
    }

    fn add_to_snapshot_set(&mut self, volume: &str, _provider: Option<Uuid>) -> Result<Uuid> {
        self.call("AddToSnapshotSet")?;
        let id = Uuid::new_v4();
        self.added.push((id, volume.to_string()));
        Ok(id)
    }

    fn prepare_for_backup(&mut self, timeout: Duration) -> Result<()> {
        self.call_async("PrepareForBackup", timeout)
    }

    fn gather_writer_status(&mut self, timeout: Duration) -> Result<()> {
        self.call_async("GatherWriterStatus", timeout)
    }

    fn free_writer_status(&mut self) -> Result<()> {
        self.call("FreeWriterStatus")
    }

    fn do_snapshot_set(&mut self, timeout: Duration) -> Result<()> {
        self.call_async("DoSnapshotSet", timeout)
    }

    fn get_snapshot_properties(&mut self, snapshot_id: Uuid) -> Result<SnapshotProperties> {
        self.call("GetSnapshotProperties")?;
        let index = self
            .added
            .iter()
            .position(|(id, _)| *id == snapshot_id)
            .ok_or_else(|| Error::custom("snapshot not in set"))?;

        Ok(SnapshotProperties {
            snapshot_id,
            snapshot_set_id: self.set_id.unwrap_or_default(),
            snapshots_count: self.added.len() as u32,
            device_object: format!(r"\\?\GLOBALROOT\Device\HarddiskVolumeShadowCopy{}", index + 1),
            original_volume: self.added[index].1.clone(),
            provider_id: Uuid::nil(),
            attributes: 0x4,
            creation_time: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            state: 12,
        })
    }

    fn backup_complete(&mut self, timeout: Duration) -> Result<()> {
        self.call_async("BackupComplete", timeout)
    }

    fn abort_backup(&mut self) -> Result<()> {
        self.call("AbortBackup")
    }

    fn delete_snapshots(&mut self, object_type: ObjectType, id: Uuid, _force: bool) -> Result<u32> {
        self.call(&format!("DeleteSnapshots({})", object_type))?;
        let deleted = self
            .script
            .snapshots
            .iter()
            .filter(|s| match object_type {
                ObjectType::SnapshotSet => s.snapshot_set_id == id,
                _ => s.snapshot_id == id,
            })
            .count();
        Ok(deleted as u32)
    }

    fn query_providers(&mut self) -> Result<Vec<ProviderProperties>> {
        self.call("Query(VSS_OBJECT_PROVIDER)")?;
        Ok(self.script.providers.clone())
    }

    fn query_snapshots(&mut self) -> Result<Vec<SnapshotProperties>> {
        self.call("Query(VSS_OBJECT_SNAPSHOT)")?;
        Ok(self.script.snapshots.clone())
    }
}

pub struct FakeFactory {
    pub script: Script,
    pub log: CallLog,
}

impl FakeFactory {
    pub fn new(script: Script) -> Self {
        FakeFactory {
            script,
            log: CallLog::default(),
        }
    }
}

impl ComponentsFactory for FakeFactory {
    type Components = FakeComponents;

    fn create(&self) -> Result<FakeComponents> {
        self.log.calls.lock().push("Create".to_string());
        Ok(FakeComponents {
            script: self.script.clone(),
            log: self.log.clone(),
            added: Vec::new(),
            set_id: None,
        })
    }

    fn volume_path_names(&self, volume_guid_path: &str) -> Result<Vec<String>> {
        Ok(self
            .script
            .volume_paths
            .get(volume_guid_path)
            .cloned()
            .unwrap_or_else(|| vec![volume_guid_path.to_string()]))
    }

    fn mounted_folders(&self, _volume: &str) -> Result<Vec<String>> {
        Ok(self.script.mounted_folders.clone())
    }
}

pub fn components(script: Script) -> (FakeComponents, CallLog) {
    let log = CallLog::default();
    let components = FakeComponents {
        script,
        log: log.clone(),
        added: Vec::new(),
        set_id: None,
    };
    (components, log)
}
