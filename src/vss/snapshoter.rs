//! Snapshoter and snapshot creator on top of the VSS binding

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::debug;
use uuid::Uuid;

use super::binding::{BackupComponents, ComponentsFactory};
use super::transaction::{create_snapshots, TransactionOptions};
use super::types::{attributes_names, provider_type_name, snapshot_state_name, Context, ObjectType};
use crate::backup::{BaseBackuper, Backuper, CreatedSnapshot, MountPointRegistry, SnapshotCreator};
use crate::error::{Error, Result};
use crate::info::{InfoCallback, MessageLevel};
use crate::model::{BackupConfig, Provider, SetInfo, Snapshot, SnapshotSet};
use crate::paths::with_separator_suffix;
use crate::snapshoter::ids::{
    format_guid, matches_filter, parse_full_guid, resolve_unique, simplify_guid, SetsBuilder,
    SnapshotRecord,
};
use crate::snapshoter::Snapshoter;

/// Snapshoter backed by the Volume Shadow Copy Service
pub struct VssSnapshoter<F: ComponentsFactory> {
    factory: Arc<F>,
    info: InfoCallback,
    /// Registry shared by the backup sessions currently open
    registry: Mutex<Weak<MountPointRegistry>>,
}

impl<F: ComponentsFactory> VssSnapshoter<F> {
    /// Fails when the components cannot be created, which usually means
    /// the process lacks backup privileges
    pub fn new(factory: F, info: InfoCallback) -> Result<Self> {
        drop(factory.create()?);

        Ok(VssSnapshoter {
            factory: Arc::new(factory),
            info,
            registry: Mutex::new(Weak::new()),
        })
    }

    fn management_components(&self) -> Result<F::Components> {
        let mut components = self.factory.create()?;
        components.initialize_for_backup()?;
        components.set_context(Context::All)?;
        Ok(components)
    }

    fn shared_registry(&self) -> Arc<MountPointRegistry> {
        let mut weak = self.registry.lock();
        if let Some(registry) = weak.upgrade() {
            return registry;
        }

        let registry = Arc::new(MountPointRegistry::new(false));
        *weak = Arc::downgrade(&registry);
        registry
    }

    fn list_snapshots_and_sets(
        &self,
        filter_snapshot_id: &str,
        filter_set_id: &str,
    ) -> Result<(Vec<Snapshot>, Vec<SnapshotSet>)> {
        let providers: HashMap<Uuid, Arc<Provider>> = self
            .management_components()?
            .query_providers()?
            .into_iter()
            .map(|p| (p.id, Arc::new(to_provider(p))))
            .collect();

        let mut builder = SetsBuilder::new();
        for props in self.management_components()?.query_snapshots()? {
            let set_id = format_guid(&props.snapshot_set_id);
            let snapshot_id = format_guid(&props.snapshot_id);

            if !matches_filter(filter_set_id, &set_id, simplify_guid)
                || !matches_filter(filter_snapshot_id, &snapshot_id, simplify_guid)
            {
                continue;
            }

            let volumes = self.factory.volume_path_names(&props.original_volume)?;

            builder.add(SnapshotRecord {
                id: snapshot_id,
                set_id,
                snapshot_count_on_creation: props.snapshots_count,
                original_path: volumes.join(", "),
                snapshot_path: props.device_object,
                creation_time: props.creation_time,
                provider: providers.get(&props.provider_id).cloned(),
                state: snapshot_state_name(props.state),
                attributes: attributes_names(props.attributes),
            });
        }

        Ok(builder.build())
    }

    fn resolve_id(
        &self,
        kind: &'static str,
        id: &str,
        list_matching: impl FnOnce(&str) -> Result<Vec<String>>,
    ) -> Result<Uuid> {
        if let Some(full) = parse_full_guid(id) {
            return Ok(full);
        }

        let full = resolve_unique(kind, id, list_matching(id)?)?;
        parse_full_guid(&full).ok_or_else(|| Error::Internal(format!("invalid {} ID: {}", kind, full)))
    }

    fn delete(&self, object_type: ObjectType, id: Uuid, force: bool) -> Result<bool> {
        (self.info)(
            MessageLevel::Trace,
            &format!("DeleteSnapshots({}, {}, {})", object_type, id, force),
        );
        let deleted = self
            .management_components()?
            .delete_snapshots(object_type, id, force)?;
        Ok(deleted > 0)
    }
}

fn to_provider(p: super::binding::ProviderProperties) -> Provider {
    Provider {
        id: format_guid(&p.id),
        name: p.name,
        version: p.version,
        provider_type: provider_type_name(p.provider_type),
    }
}

/// Mount points of a volume as VSS sees them: mounted folders plus the root
fn list_mount_points<F: ComponentsFactory>(factory: &F, volume: &str) -> Result<Vec<String>> {
    let mut result = factory.mounted_folders(volume)?;
    result.push(with_separator_suffix(volume));
    Ok(result)
}

impl<F: ComponentsFactory> Snapshoter for VssSnapshoter<F> {
    fn list_providers(&self, filter_id: &str) -> Result<Vec<Provider>> {
        let providers = self.management_components()?.query_providers()?;

        Ok(providers
            .into_iter()
            .map(to_provider)
            .filter(|p| matches_filter(filter_id, &p.id, simplify_guid))
            .collect())
    }

    fn list_sets(&self, filter_id: &str) -> Result<Vec<SnapshotSet>> {
        self.list_snapshots_and_sets("", filter_id).map(|(_, sets)| sets)
    }

    fn list_snapshots(&self, filter_id: &str) -> Result<Vec<Snapshot>> {
        self.list_snapshots_and_sets(filter_id, "")
            .map(|(snapshots, _)| snapshots)
    }

    fn simplify_id(&self, id: &str) -> String {
        simplify_guid(id)
    }

    fn delete_set(&self, id: &str, force: bool) -> Result<bool> {
        let id = self.resolve_id("snapshot set", id, |id| {
            Ok(self.list_sets(id)?.iter().map(|s| s.id().to_string()).collect())
        })?;
        self.delete(ObjectType::SnapshotSet, id, force)
    }

    fn delete_snapshot(&self, id: &str, force: bool) -> Result<bool> {
        let id = self.resolve_id("snapshot", id, |id| {
            Ok(self.list_snapshots(id)?.into_iter().map(|s| s.id).collect())
        })?;
        self.delete(ObjectType::Snapshot, id, force)
    }

    fn list_mount_points(&self, volume: &str) -> Result<Vec<String>> {
        list_mount_points(self.factory.as_ref(), volume)
    }

    fn start_backup(&self, config: BackupConfig) -> Result<Box<dyn Backuper>> {
        let provider_id = if config.provider_id.is_empty() {
            None
        } else {
            Some(self.resolve_id("provider", &config.provider_id, |id| {
                Ok(self.list_providers(id)?.into_iter().map(|p| p.id).collect())
            })?)
        };

        let info = config.info_callback.unwrap_or_else(|| self.info.clone());

        let creator = VssCreator {
            factory: self.factory.clone(),
            options: TransactionOptions {
                provider_id,
                timeout: config.timeout,
                writers: !config.simple,
                info: info.clone(),
            },
        };

        Ok(Box::new(BaseBackuper::with_registry(
            creator,
            self.shared_registry(),
            info,
        )))
    }

    fn close(&self) {}
}

/// Creates one VSS transaction per mount point
pub struct VssCreator<F: ComponentsFactory> {
    factory: Arc<F>,
    options: TransactionOptions,
}

impl<F: ComponentsFactory> SnapshotCreator for VssCreator<F> {
    fn case_sensitive(&self) -> bool {
        false
    }

    fn list_mount_points(&self, volume: &str) -> Result<Vec<String>> {
        list_mount_points(self.factory.as_ref(), volume)
    }

    fn create_snapshot(&self, mount_point: &str) -> Result<CreatedSnapshot> {
        (self.options.info)(MessageLevel::Trace, "NewIVSSBackupComponents()");
        let components = self.factory.create()?;

        let result = create_snapshots(components, &[mount_point], self.options.clone())?;

        let props = result
            .properties(mount_point)
            .cloned()
            .ok_or_else(|| Error::VolumeNotSupported(mount_point.to_string()))?;
        debug!("Created VSS snapshot {} of {}", props.snapshot_id, mount_point);

        let snapshot = Snapshot {
            id: format_guid(&props.snapshot_id),
            original_path: mount_point.to_string(),
            snapshot_path: props.device_object,
            creation_time: props.creation_time,
            set: Some(Arc::new(SetInfo {
                id: format_guid(&props.snapshot_set_id),
                creation_time: props.creation_time,
                snapshot_count_on_creation: props.snapshots_count,
            })),
            provider: None,
            state: snapshot_state_name(props.state),
            attributes: attributes_names(props.attributes),
        };

        Ok(CreatedSnapshot::new(snapshot, result))
    }
}
