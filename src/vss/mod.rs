//! Volume Shadow Copy Service snapshots
//!
//! The transaction engine and the snapshoter are platform independent and
//! run against the [`BackupComponents`] binding. Only [`ffi`] talks to the
//! real `VssApi.dll`, and only on Windows.

mod binding;
#[cfg(test)]
mod fake;
#[cfg(windows)]
pub mod ffi;
mod snapshoter;
mod transaction;
pub mod types;

pub use binding::{BackupComponents, ComponentsFactory, ProviderProperties, SnapshotProperties};
pub use snapshoter::{VssCreator, VssSnapshoter};
pub use transaction::{create_snapshots, Deadline, SnapshotsResult, TransactionOptions};
