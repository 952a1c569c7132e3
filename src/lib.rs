//! fs-snapshot - Temporary read-only filesystem snapshots for backup agents
//!
//! A backup agent asks a [`Snapshoter`](snapshoter::Snapshoter) for a
//! backup session and then, for every directory it is about to read, for
//! the matching path inside a snapshot. Snapshots are created lazily, at
//! most once per mount point, and released when the session is closed.
//!
//! Snapshots come from the Volume Shadow Copy Service on Windows and from
//! Time Machine local snapshots on macOS. Because creating them needs
//! elevated privileges, the library can also run as a snapshot server that
//! unprivileged processes reach over a local TCP connection.

pub mod backup;
pub mod config;
pub mod error;
pub mod info;
pub mod launch;
pub mod model;
pub mod paths;
pub mod process;
pub mod rpc;
pub mod snapshoter;
pub mod tmutil;
pub mod vss;

pub use config::Config;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::backup::Backuper;
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::info::{InfoCallback, MessageLevel};
    pub use crate::model::{BackupConfig, Provider, Snapshot, SnapshotSet};
    pub use crate::snapshoter::{new_snapshoter, ConnectionType, Snapshoter, SnapshoterConfig};
}
