//! Typed view of the VSS backup components API
//!
//! Every call returns a checked [`Result`]; failures carry the call name
//! and the HRESULT. Asynchronous calls take the time they may wait and
//! return only once the operation finished, failed or timed out. The
//! Windows implementation lives in [`super::ffi`]; tests drive the
//! transaction engine through scripted implementations.

use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use super::types::{BackupType, Context, ObjectType};
use crate::error::Result;

/// Owned copy of `VSS_SNAPSHOT_PROP`
#[derive(Debug, Clone)]
pub struct SnapshotProperties {
    pub snapshot_id: Uuid,
    pub snapshot_set_id: Uuid,
    pub snapshots_count: u32,
    /// Device path the snapshot is readable at
    pub device_object: String,
    /// `\\?\Volume{...}\` path of the original volume
    pub original_volume: String,
    pub provider_id: Uuid,
    pub attributes: u32,
    pub creation_time: DateTime<Utc>,
    pub state: u32,
}

/// Owned copy of `VSS_PROVIDER_PROP`
#[derive(Debug, Clone)]
pub struct ProviderProperties {
    pub id: Uuid,
    pub name: String,
    pub version: String,
    pub provider_type: u32,
}

/// One `IVssBackupComponents` instance. Dropping it releases the COM object.
pub trait BackupComponents {
    fn initialize_for_backup(&mut self) -> Result<()>;

    fn set_context(&mut self, context: Context) -> Result<()>;

    fn set_backup_state(
        &mut self,
        select_components: bool,
        bootable_system_state: bool,
        backup_type: BackupType,
        partial_file_support: bool,
    ) -> Result<()>;

    fn gather_writer_metadata(&mut self, timeout: Duration) -> Result<()>;

    fn free_writer_metadata(&mut self) -> Result<()>;

    /// `provider` of `None` means the system default provider
    fn is_volume_supported(&mut self, provider: Option<Uuid>, volume: &str) -> Result<bool>;

    fn start_snapshot_set(&mut self) -> Result<Uuid>;

    fn add_to_snapshot_set(&mut self, volume: &str, provider: Option<Uuid>) -> Result<Uuid>;

    fn prepare_for_backup(&mut self, timeout: Duration) -> Result<()>;

    fn gather_writer_status(&mut self, timeout: Duration) -> Result<()>;

    fn free_writer_status(&mut self) -> Result<()>;

    fn do_snapshot_set(&mut self, timeout: Duration) -> Result<()>;

    fn get_snapshot_properties(&mut self, snapshot_id: Uuid) -> Result<SnapshotProperties>;

    fn backup_complete(&mut self, timeout: Duration) -> Result<()>;

    fn abort_backup(&mut self) -> Result<()>;

    /// Number of snapshots deleted; a missing object deletes nothing
    fn delete_snapshots(&mut self, object_type: ObjectType, id: Uuid, force: bool) -> Result<u32>;

    fn query_providers(&mut self) -> Result<Vec<ProviderProperties>>;

    fn query_snapshots(&mut self) -> Result<Vec<SnapshotProperties>>;
}

/// Creates backup components and answers the volume questions that live
/// outside them
pub trait ComponentsFactory: Send + Sync + 'static {
    type Components: BackupComponents + Send + 'static;

    fn create(&self) -> Result<Self::Components>;

    /// Mount paths of a `\\?\Volume{...}\` volume, sorted
    fn volume_path_names(&self, volume_guid_path: &str) -> Result<Vec<String>>;

    /// Folders where other volumes are mounted inside `volume`
    fn mounted_folders(&self, volume: &str) -> Result<Vec<String>>;
}
