//! VSS constants and their display forms

use chrono::{DateTime, TimeZone, Utc};
use std::fmt;

/// `VSS_SNAPSHOT_CONTEXT`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Context {
    /// Writer-coordinated backup
    Backup,
    /// No writers involved
    FileShareBackup,
    /// Every snapshot, for management operations
    All,
}

impl Context {
    pub fn raw(self) -> u32 {
        match self {
            Context::Backup => 0x0,
            Context::FileShareBackup => 0x10,
            Context::All => 0xffff_ffff,
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Context::Backup => "VSS_CTX_BACKUP",
            Context::FileShareBackup => "VSS_CTX_FILE_SHARE_BACKUP",
            Context::All => "VSS_CTX_ALL",
        })
    }
}

/// `VSS_BACKUP_TYPE`; only copy backups are made so the volume's backup
/// history is left alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupType {
    Full,
    Copy,
}

impl BackupType {
    pub fn raw(self) -> u32 {
        match self {
            BackupType::Full => 1,
            BackupType::Copy => 5,
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackupType::Full => "VSS_BT_FULL",
            BackupType::Copy => "VSS_BT_COPY",
        })
    }
}

/// `VSS_OBJECT_TYPE`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    None,
    SnapshotSet,
    Snapshot,
    Provider,
}

impl ObjectType {
    pub fn raw(self) -> u32 {
        match self {
            ObjectType::None => 1,
            ObjectType::SnapshotSet => 2,
            ObjectType::Snapshot => 3,
            ObjectType::Provider => 4,
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ObjectType::None => "VSS_OBJECT_NONE",
            ObjectType::SnapshotSet => "VSS_OBJECT_SNAPSHOT_SET",
            ObjectType::Snapshot => "VSS_OBJECT_SNAPSHOT",
            ObjectType::Provider => "VSS_OBJECT_PROVIDER",
        })
    }
}

/// `VSS_PROVIDER_TYPE` as shown to users
pub fn provider_type_name(raw: u32) -> String {
    match raw {
        0 => "Unknown".into(),
        1 => "System".into(),
        2 => "Software".into(),
        3 => "Hardware".into(),
        4 => "File share".into(),
        other => format!("Unknown ({})", other),
    }
}

/// `VSS_SNAPSHOT_STATE` as shown to users
pub fn snapshot_state_name(raw: u32) -> String {
    const NAMES: [&str; 17] = [
        "Unknown",
        "Preparing",
        "Processing prepare",
        "Prepared",
        "Processing precommit",
        "Precommitted",
        "Processing commit",
        "Committed",
        "Processing postcommit",
        "Processing prefinalcommit",
        "Prefinalcommitted",
        "Processing postfinalcommit",
        "Created",
        "Aborted",
        "Deleted",
        "Postcommitted",
        "Count",
    ];

    NAMES
        .get(raw as usize)
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("Unknown ({})", raw))
}

const ATTRIBUTE_NAMES: &[(u32, &str)] = &[
    (0x1, "persistent"),
    (0x2, "no auto recovery"),
    (0x4, "client-accessible"),
    (0x8, "no auto release"),
    (0x10, "no writers"),
    (0x20, "transportable"),
    (0x40, "not surfaced"),
    (0x80, "not transacted"),
    (0x10000, "hardware assisted"),
    (0x20000, "differential"),
    (0x40000, "plex"),
    (0x80000, "imported"),
    (0x100000, "exposed locally"),
    (0x200000, "exposed remotely"),
    (0x400000, "autorecover"),
    (0x800000, "rollback recovery"),
    (0x1000000, "delayed postsnapshot"),
    (0x2000000, "txf recovery"),
    (0x4000000, "file share"),
];

/// `VSS_VOLUME_SNAPSHOT_ATTRIBUTES` flags as a comma separated list
pub fn attributes_names(raw: u32) -> String {
    ATTRIBUTE_NAMES
        .iter()
        .filter(|(flag, _)| raw & flag != 0)
        .map(|(_, name)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

pub const S_OK: u32 = 0x0000_0000;
pub const S_FALSE: u32 = 0x0000_0001;
pub const E_ACCESSDENIED: u32 = 0x8007_0005;
pub const VSS_E_OBJECT_NOT_FOUND: u32 = 0x8004_2308;

pub const VSS_S_ASYNC_PENDING: u32 = 0x0004_2309;
pub const VSS_S_ASYNC_FINISHED: u32 = 0x0004_230A;
pub const VSS_S_ASYNC_CANCELLED: u32 = 0x0004_230B;

const HRESULT_NAMES: &[(u32, &str)] = &[
    (S_OK, "S_OK"),
    (S_FALSE, "S_FALSE"),
    (E_ACCESSDENIED, "E_ACCESSDENIED"),
    (0x8007_000E, "E_OUTOFMEMORY"),
    (0x8007_0057, "E_INVALIDARG"),
    (0x8004_2301, "VSS_E_BAD_STATE"),
    (0x8004_2302, "VSS_E_UNEXPECTED"),
    (0x8004_2303, "VSS_E_PROVIDER_ALREADY_REGISTERED"),
    (0x8004_2304, "VSS_E_PROVIDER_NOT_REGISTERED"),
    (0x8004_2306, "VSS_E_PROVIDER_VETO"),
    (0x8004_2307, "VSS_E_PROVIDER_IN_USE"),
    (VSS_E_OBJECT_NOT_FOUND, "VSS_E_OBJECT_NOT_FOUND"),
    (0x8004_230C, "VSS_E_VOLUME_NOT_SUPPORTED"),
    (0x8004_230D, "VSS_E_OBJECT_ALREADY_EXISTS"),
    (0x8004_230E, "VSS_E_VOLUME_NOT_SUPPORTED_BY_PROVIDER"),
    (0x8004_230F, "VSS_E_UNEXPECTED_PROVIDER_ERROR"),
    (0x8004_2310, "VSS_E_CORRUPT_XML_DOCUMENT"),
    (0x8004_2311, "VSS_E_INVALID_XML_DOCUMENT"),
    (0x8004_2312, "VSS_E_MAXIMUM_NUMBER_OF_VOLUMES_REACHED"),
    (0x8004_2313, "VSS_E_FLUSH_WRITES_TIMEOUT"),
    (0x8004_2314, "VSS_E_HOLD_WRITES_TIMEOUT"),
    (0x8004_2315, "VSS_E_UNEXPECTED_WRITER_ERROR"),
    (0x8004_2316, "VSS_E_SNAPSHOT_SET_IN_PROGRESS"),
    (0x8004_2317, "VSS_E_MAXIMUM_NUMBER_OF_SNAPSHOTS_REACHED"),
    (0x8004_2318, "VSS_E_WRITER_INFRASTRUCTURE"),
    (0x8004_2319, "VSS_E_WRITER_NOT_RESPONDING"),
    (0x8004_231A, "VSS_E_WRITER_ALREADY_SUBSCRIBED"),
    (0x8004_231B, "VSS_E_UNSUPPORTED_CONTEXT"),
    (0x8004_231D, "VSS_E_VOLUME_IN_USE"),
    (0x8004_231E, "VSS_E_MAXIMUM_DIFFAREA_ASSOCIATIONS_REACHED"),
    (0x8004_231F, "VSS_E_INSUFFICIENT_STORAGE"),
    (0x8004_2320, "VSS_E_NO_SNAPSHOTS_IMPORTED"),
    (0x8004_2321, "VSS_E_SOME_SNAPSHOTS_NOT_IMPORTED"),
    (0x8004_2322, "VSS_E_MAXIMUM_NUMBER_OF_REMOTE_MACHINES_REACHED"),
    (0x8004_2323, "VSS_E_REMOTE_SERVER_UNAVAILABLE"),
    (0x8004_2324, "VSS_E_REMOTE_SERVER_UNSUPPORTED"),
    (0x8004_2325, "VSS_E_REVERT_IN_PROGRESS"),
    (0x8004_2326, "VSS_E_REVERT_VOLUME_LOST"),
    (0x8004_2327, "VSS_E_REBOOT_REQUIRED"),
    (0x8004_2328, "VSS_E_TRANSACTION_FREEZE_TIMEOUT"),
    (0x8004_2329, "VSS_E_TRANSACTION_THAW_TIMEOUT"),
    (0x8004_232A, "VSS_E_UNSELECTED_VOLUME"),
    (0x8004_232B, "VSS_E_SNAPSHOT_NOT_IN_SET"),
    (0x8004_232C, "VSS_E_NESTED_VOLUME_LIMIT"),
    (0x8004_232D, "VSS_E_VOLUME_NOT_LOCAL"),
    (0x8004_232E, "VSS_E_CLUSTER_TIMEOUT"),
    (0x8004_232F, "VSS_E_NOT_SUPPORTED"),
    (0x8004_2336, "VSS_E_WRITERERROR_PARTIAL_FAILURE"),
    (0x8004_23F0, "VSS_E_WRITERERROR_INCONSISTENTSNAPSHOT"),
    (0x8004_23F1, "VSS_E_WRITERERROR_OUTOFRESOURCES"),
    (0x8004_23F2, "VSS_E_WRITERERROR_TIMEOUT"),
    (0x8004_23F3, "VSS_E_WRITERERROR_RETRYABLE"),
    (0x8004_23F4, "VSS_E_WRITERERROR_NONRETRYABLE"),
    (0x8004_23F5, "VSS_E_WRITERERROR_RECOVERY_FAILED"),
    (0x8004_23F6, "VSS_E_BREAK_REVERT_ID_FAILED"),
    (0x8004_23F7, "VSS_E_LEGACY_PROVIDER"),
    (0x8004_23F8, "VSS_E_MISSING_DISK"),
    (0x8004_23F9, "VSS_E_MISSING_HIDDEN_VOLUME"),
    (0x8004_23FA, "VSS_E_MISSING_VOLUME"),
    (0x8004_23FB, "VSS_E_AUTORECOVERY_FAILED"),
    (0x8004_23FC, "VSS_E_DYNAMIC_DISK_ERROR"),
    (0x8004_23FD, "VSS_E_NONTRANSPORTABLE_BCD"),
    (0x8004_23FE, "VSS_E_CANNOT_REVERT_DISKID"),
    (0x8004_23FF, "VSS_E_RESYNC_IN_PROGRESS"),
    (0x8004_2400, "VSS_E_CLUSTER_ERROR"),
    (0x8004_2409, "VSS_E_WRITER_STATUS_NOT_AVAILABLE"),
];

/// Symbolic name of an HRESULT returned by the VSS API
pub fn hresult_name(code: u32) -> &'static str {
    HRESULT_NAMES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
        .unwrap_or("UNKNOWN")
}

/// Convert a `FILETIME` (100ns ticks since 1601-01-01 UTC)
pub fn filetime_to_datetime(ticks: u64) -> DateTime<Utc> {
    const TICKS_PER_SECOND: u64 = 10_000_000;
    const UNIX_EPOCH_OFFSET_SECS: i64 = 11_644_473_600;

    let secs = (ticks / TICKS_PER_SECOND) as i64 - UNIX_EPOCH_OFFSET_SECS;
    let nanos = ((ticks % TICKS_PER_SECOND) * 100) as u32;

    Utc.timestamp_opt(secs, nanos)
        .single()
        .unwrap_or_default()
}
