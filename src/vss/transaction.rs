//! The VSS snapshot transaction
//!
//! [`create_snapshots`] runs the backup protocol phase by phase against
//! one [`BackupComponents`] instance. Whatever happens, the returned (or
//! discarded) [`SnapshotsResult`] undoes the transaction when dropped:
//! writers are told the backup completed or was aborted, the snapshot set
//! is deleted and the components are released last.

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;
use uuid::Uuid;

use super::binding::{BackupComponents, SnapshotProperties};
use super::types::{BackupType, Context, ObjectType};
use crate::error::{Error, Result};
use crate::info::{InfoCallback, MessageLevel};

/// Options for one transaction
#[derive(Clone)]
pub struct TransactionOptions {
    /// `None` lets VSS pick the provider
    pub provider_id: Option<Uuid>,
    /// Budget shared by every asynchronous phase
    pub timeout: Duration,
    /// Coordinate with VSS writers
    pub writers: bool,
    pub info: InfoCallback,
}

/// Wall-clock budget started when the transaction begins
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn new(budget: Duration) -> Self {
        Deadline {
            start: Instant::now(),
            budget,
        }
    }

    /// Time left for `phase`, or a timeout error if none is left
    pub fn remaining(&self, phase: &str) -> Result<Duration> {
        self.budget
            .checked_sub(self.start.elapsed())
            .filter(|d| !d.is_zero())
            .ok_or_else(|| Error::Timeout(phase.to_string()))
    }
}

struct VolumeSnapshot {
    volume: String,
    snapshot_id: Uuid,
    properties: Option<SnapshotProperties>,
}

/// A (possibly partial) snapshot transaction
pub struct SnapshotsResult<C: BackupComponents> {
    options: TransactionOptions,
    set_id: Option<Uuid>,
    volumes: Vec<VolumeSnapshot>,
    prepare_for_backup_called: bool,
    snapshot_set_done: bool,
    // Declared last: dropped after Drop::drop has run the cleanup calls
    components: Mutex<C>,
}

/// Snapshot `volumes` in one set
///
/// On error every phase already done is undone before returning.
pub fn create_snapshots<C: BackupComponents>(
    components: C,
    volumes: &[&str],
    options: TransactionOptions,
) -> Result<SnapshotsResult<C>> {
    let mut result = SnapshotsResult {
        options,
        set_id: None,
        volumes: Vec::new(),
        prepare_for_backup_called: false,
        snapshot_set_done: false,
        components: Mutex::new(components),
    };

    result.run(volumes)?;
    Ok(result)
}

impl<C: BackupComponents> std::fmt::Debug for SnapshotsResult<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotsResult")
            .field("set_id", &self.set_id)
            .field("prepare_for_backup_called", &self.prepare_for_backup_called)
            .field("snapshot_set_done", &self.snapshot_set_done)
            .finish_non_exhaustive()
    }
}

impl<C: BackupComponents> SnapshotsResult<C> {
    pub fn set_id(&self) -> Option<Uuid> {
        self.set_id
    }

    /// Properties of the snapshot taken of `volume`
    pub fn properties(&self, volume: &str) -> Option<&SnapshotProperties> {
        self.volumes
            .iter()
            .find(|v| v.volume == volume)
            .and_then(|v| v.properties.as_ref())
    }

    /// Device path of the snapshot taken of `volume`
    pub fn snapshot_path(&self, volume: &str) -> Option<&str> {
        self.properties(volume).map(|p| p.device_object.as_str())
    }

    fn trace(&self, msg: &str) {
        (self.options.info)(MessageLevel::Trace, msg);
    }

    fn run(&mut self, volumes: &[&str]) -> Result<()> {
        let deadline = Deadline::new(self.options.timeout);
        let writers = self.options.writers;
        let provider = self.options.provider_id;

        self.trace("InitializeForBackup()");
        self.components.get_mut().initialize_for_backup()?;

        let context = if writers {
            Context::Backup
        } else {
            Context::FileShareBackup
        };
        self.trace(&format!("SetContext({})", context));
        self.components.get_mut().set_context(context)?;

        self.trace(&format!("SetBackupState(false, false, {}, false)", BackupType::Copy));
        self.components
            .get_mut()
            .set_backup_state(false, false, BackupType::Copy, false)?;

        if writers {
            self.trace("GatherWriterMetadata()");
            let timeout = deadline.remaining("GatherWriterMetadata()")?;
            self.components.get_mut().gather_writer_metadata(timeout)?;

            self.trace("FreeWriterMetadata()");
            self.components.get_mut().free_writer_metadata()?;
        }

        let mut supported = Vec::with_capacity(volumes.len());
        for volume in volumes {
            self.trace(&format!("IsVolumeSupported({})", volume));
            if self.components.get_mut().is_volume_supported(provider, volume)? {
                supported.push(*volume);
            } else {
                (self.options.info)(
                    MessageLevel::Details,
                    &format!("Snapshots not supported in volume {}", volume),
                );
            }
        }

        if supported.is_empty() {
            self.trace("Aborting snapshot because there is no supported volume");
            return Err(Error::VolumeNotSupported(volumes.join(", ")));
        }

        self.trace("StartSnapshotSet()");
        let set_id = self.components.get_mut().start_snapshot_set()?;
        self.set_id = Some(set_id);
        self.trace(&format!("Set ID: {}", set_id));

        for volume in supported {
            self.trace(&format!("AddToSnapshotSet({})", volume));
            let snapshot_id = self.components.get_mut().add_to_snapshot_set(volume, provider)?;
            self.trace(&format!("Volume {} snapshot ID: {}", volume, snapshot_id));

            self.volumes.push(VolumeSnapshot {
                volume: volume.to_string(),
                snapshot_id,
                properties: None,
            });
        }

        if writers {
            self.trace("PrepareForBackup()");
            let timeout = deadline.remaining("PrepareForBackup()")?;
            self.prepare_for_backup_called = true;
            self.components.get_mut().prepare_for_backup(timeout)?;

            self.gather_writer_status(&deadline)?;
        }

        self.trace("DoSnapshotSet()");
        let timeout = deadline.remaining("DoSnapshotSet()")?;
        self.components.get_mut().do_snapshot_set(timeout)?;
        self.snapshot_set_done = true;

        if writers {
            self.gather_writer_status(&deadline)?;
        }

        for i in 0..self.volumes.len() {
            let snapshot_id = self.volumes[i].snapshot_id;
            self.trace(&format!("GetSnapshotProperties({})", snapshot_id));
            let properties = self.components.get_mut().get_snapshot_properties(snapshot_id)?;
            self.volumes[i].properties = Some(properties);
        }

        Ok(())
    }

    fn gather_writer_status(&mut self, deadline: &Deadline) -> Result<()> {
        self.trace("GatherWriterStatus()");
        let timeout = deadline.remaining("GatherWriterStatus()")?;
        self.components.get_mut().gather_writer_status(timeout)?;

        self.trace("FreeWriterStatus()");
        self.components.get_mut().free_writer_status()
    }
}

fn log_cleanup_failure(call: &str, result: Result<impl Sized>) {
    if let Err(e) = result {
        warn!("{} failed during snapshot cleanup: {}", call, e);
    }
}

impl<C: BackupComponents> Drop for SnapshotsResult<C> {
    fn drop(&mut self) {
        let info = self.options.info.clone();
        let trace = |msg: &str| info(MessageLevel::Trace, msg);
        let components = self.components.get_mut();

        for volume in &mut self.volumes {
            if volume.properties.take().is_some() {
                trace(&format!("VssFreeSnapshotProperties({})", volume.snapshot_id));
            }
        }

        if self.snapshot_set_done {
            if self.options.writers {
                // Full budget: writers must hear about the backup no matter how long it took
                let timeout = self.options.timeout;

                trace("BackupComplete()");
                log_cleanup_failure("BackupComplete()", components.backup_complete(timeout));

                trace("GatherWriterStatus()");
                log_cleanup_failure("GatherWriterStatus()", components.gather_writer_status(timeout));

                trace("FreeWriterStatus()");
                log_cleanup_failure("FreeWriterStatus()", components.free_writer_status());
            }
        } else if self.prepare_for_backup_called {
            trace("AbortBackup()");
            log_cleanup_failure("AbortBackup()", components.abort_backup());
        }

        if let Some(set_id) = self.set_id {
            trace(&format!(
                "DeleteSnapshots({}, {}, true)",
                ObjectType::SnapshotSet,
                set_id
            ));
            log_cleanup_failure(
                "DeleteSnapshots()",
                components.delete_snapshots(ObjectType::SnapshotSet, set_id, true),
            );
        }

        trace("Release()");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::silent_callback;
    use crate::vss::fake::{components, Script};

    const VOLUME: &str = r"C:\";

    fn options(writers: bool, timeout: Duration) -> TransactionOptions {
        TransactionOptions {
            provider_id: None,
            timeout,
            writers,
            info: silent_callback(),
        }
    }

    fn strs(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_writer_coordinated_transaction_order() {
        let (c, log) = components(Script::default());

        let result = create_snapshots(c, &[VOLUME], options(true, Duration::from_secs(60))).unwrap();

        assert_eq!(
            result.snapshot_path(VOLUME),
            Some(r"\\?\GLOBALROOT\Device\HarddiskVolumeShadowCopy1")
        );
        assert_eq!(
            log.calls(),
            strs(&[
                "InitializeForBackup",
                "SetContext(VSS_CTX_BACKUP)",
                "SetBackupState",
                "GatherWriterMetadata",
                "FreeWriterMetadata",
                "IsVolumeSupported",
                "StartSnapshotSet",
                "AddToSnapshotSet",
                "PrepareForBackup",
                "GatherWriterStatus",
                "FreeWriterStatus",
                "DoSnapshotSet",
                "GatherWriterStatus",
                "FreeWriterStatus",
                "GetSnapshotProperties",
            ])
        );

        log.clear();
        drop(result);

        assert_eq!(
            log.calls(),
            strs(&[
                "BackupComplete",
                "GatherWriterStatus",
                "FreeWriterStatus",
                "DeleteSnapshots(VSS_OBJECT_SNAPSHOT_SET)",
                "Release",
            ])
        );
    }

    #[test]
    fn test_simple_transaction_skips_writers() {
        let (c, log) = components(Script::default());

        let result = create_snapshots(c, &[VOLUME], options(false, Duration::from_secs(60))).unwrap();
        drop(result);

        let calls = log.calls();
        assert_eq!(calls[1], "SetContext(VSS_CTX_FILE_SHARE_BACKUP)");
        for writer_call in ["GatherWriterMetadata", "PrepareForBackup", "GatherWriterStatus", "BackupComplete"] {
            assert_eq!(log.count(writer_call), 0, "{} should not be called", writer_call);
        }
        assert_eq!(calls[calls.len() - 2], "DeleteSnapshots(VSS_OBJECT_SNAPSHOT_SET)");
        assert_eq!(calls.last().unwrap(), "Release");
    }

    #[test]
    fn test_failed_snapshot_aborts_instead_of_completing() {
        let (c, log) = components(Script {
            fail_at: Some("DoSnapshotSet"),
            ..Script::default()
        });

        let err = create_snapshots(c, &[VOLUME], options(true, Duration::from_secs(60))).unwrap_err();

        assert!(matches!(err, Error::Native { .. }));
        assert_eq!(log.count("BackupComplete"), 0);
        let calls = log.calls();
        let tail = &calls[calls.len() - 3..];
        assert_eq!(
            tail,
            strs(&["AbortBackup", "DeleteSnapshots(VSS_OBJECT_SNAPSHOT_SET)", "Release"])
        );
    }

    #[test]
    fn test_failure_before_set_only_releases() {
        let (c, log) = components(Script {
            fail_at: Some("StartSnapshotSet"),
            ..Script::default()
        });

        assert!(create_snapshots(c, &[VOLUME], options(true, Duration::from_secs(60))).is_err());

        assert_eq!(log.count("AbortBackup"), 0);
        assert_eq!(log.count("DeleteSnapshots(VSS_OBJECT_SNAPSHOT_SET)"), 0);
        assert_eq!(log.calls().last().unwrap(), "Release");
    }

    #[test]
    fn test_failure_after_snapshot_still_completes_backup() {
        let (c, log) = components(Script {
            fail_at: Some("GetSnapshotProperties"),
            ..Script::default()
        });

        assert!(create_snapshots(c, &[VOLUME], options(true, Duration::from_secs(60))).is_err());

        assert_eq!(log.count("BackupComplete"), 1);
        assert_eq!(log.count("AbortBackup"), 0);
        assert_eq!(log.calls().last().unwrap(), "Release");
    }

    #[test]
    fn test_no_supported_volume() {
        let (c, log) = components(Script {
            unsupported: vec![VOLUME.to_string()],
            ..Script::default()
        });

        let err = create_snapshots(c, &[VOLUME], options(true, Duration::from_secs(60))).unwrap_err();

        assert!(matches!(err, Error::VolumeNotSupported(_)));
        assert_eq!(log.count("StartSnapshotSet"), 0);
        assert_eq!(log.calls().last().unwrap(), "Release");
    }

    #[test]
    fn test_unsupported_volumes_are_skipped() {
        let (c, log) = components(Script {
            unsupported: vec![r"D:\".to_string()],
            ..Script::default()
        });

        let result =
            create_snapshots(c, &[VOLUME, r"D:\"], options(false, Duration::from_secs(60))).unwrap();

        assert!(result.snapshot_path(VOLUME).is_some());
        assert!(result.snapshot_path(r"D:\").is_none());
        assert_eq!(log.count("AddToSnapshotSet"), 1);
    }

    #[test]
    fn test_exhausted_budget_fails_before_async_call() {
        let (c, log) = components(Script::default());

        let err = create_snapshots(c, &[VOLUME], options(true, Duration::ZERO)).unwrap_err();

        assert!(matches!(err, Error::Timeout(ref phase) if phase == "GatherWriterMetadata()"));
        assert_eq!(log.count("GatherWriterMetadata"), 0);
        assert_eq!(log.calls().last().unwrap(), "Release");
    }

    #[test]
    fn test_timeout_after_prepare_aborts_backup() {
        let (c, log) = components(Script {
            delay_at: Some(("PrepareForBackup", Duration::from_millis(300))),
            ..Script::default()
        });

        let err = create_snapshots(c, &[VOLUME], options(true, Duration::from_millis(200))).unwrap_err();

        assert!(matches!(err, Error::Timeout(ref phase) if phase == "GatherWriterStatus()"));
        assert_eq!(log.count("AbortBackup"), 1);
        assert_eq!(log.count("DeleteSnapshots(VSS_OBJECT_SNAPSHOT_SET)"), 1);
    }

    #[test]
    fn test_async_phases_get_remaining_budget_and_completion_gets_all() {
        let budget = Duration::from_secs(60);
        let (c, log) = components(Script::default());

        drop(create_snapshots(c, &[VOLUME], options(true, budget)).unwrap());

        for (call, timeout) in log.timeouts() {
            if call == "BackupComplete" {
                assert_eq!(timeout, budget);
            } else {
                assert!(timeout <= budget, "{} got {:?}", call, timeout);
            }
        }
        assert!(log.timeouts().iter().any(|(c, _)| c == "BackupComplete"));
    }

    #[test]
    fn test_deadline_reports_phase() {
        let deadline = Deadline::new(Duration::from_secs(10));
        assert!(deadline.remaining("DoSnapshotSet()").unwrap() <= Duration::from_secs(10));

        let expired = Deadline::new(Duration::ZERO);
        assert!(matches!(expired.remaining("DoSnapshotSet()"), Err(Error::Timeout(_))));
    }
}
