//! Snapshoter facade and implementation selection
//!
//! A [`Snapshoter`] lists and deletes snapshots and starts backup
//! sessions. Which implementation backs it (native, tool based, remote or
//! no-op) is decided once at startup by [`new_snapshoter`].

pub mod ids;
mod null;

pub use null::NullSnapshoter;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::backup::Backuper;
use crate::error::{Error, Result};
use crate::info::{InfoCallback, MessageLevel};
use crate::model::{BackupConfig, Provider, Snapshot, SnapshotSet};
use crate::rpc::{self, ClientSnapshoter};

/// Snapshot enumeration, deletion and backup sessions
///
/// Filters are empty (everything), a full id or a shortened id.
pub trait Snapshoter: Send + Sync {
    /// Providers able to create snapshots
    fn list_providers(&self, filter_id: &str) -> Result<Vec<Provider>>;

    /// Snapshot sets, each with its member snapshots
    fn list_sets(&self, filter_id: &str) -> Result<Vec<SnapshotSet>>;

    /// Snapshots, each linked to its (shared) set
    fn list_snapshots(&self, filter_id: &str) -> Result<Vec<Snapshot>>;

    /// Shortened form of an id, for display only
    fn simplify_id(&self, id: &str) -> String;

    /// Delete a set and all its snapshots. `Ok(false)` if it does not exist.
    fn delete_set(&self, id: &str, force: bool) -> Result<bool>;

    /// Delete one snapshot. `Ok(false)` if it does not exist.
    fn delete_snapshot(&self, id: &str, force: bool) -> Result<bool>;

    /// Mount points of a volume, volume root included
    fn list_mount_points(&self, volume: &str) -> Result<Vec<String>>;

    /// Start a backup session
    fn start_backup(&self, config: BackupConfig) -> Result<Box<dyn Backuper>>;

    /// Free resources held by the snapshoter
    fn close(&self);
}

impl<S: Snapshoter + ?Sized> Snapshoter for Arc<S> {
    fn list_providers(&self, filter_id: &str) -> Result<Vec<Provider>> {
        (**self).list_providers(filter_id)
    }

    fn list_sets(&self, filter_id: &str) -> Result<Vec<SnapshotSet>> {
        (**self).list_sets(filter_id)
    }

    fn list_snapshots(&self, filter_id: &str) -> Result<Vec<Snapshot>> {
        (**self).list_snapshots(filter_id)
    }

    fn simplify_id(&self, id: &str) -> String {
        (**self).simplify_id(id)
    }

    fn delete_set(&self, id: &str, force: bool) -> Result<bool> {
        (**self).delete_set(id, force)
    }

    fn delete_snapshot(&self, id: &str, force: bool) -> Result<bool> {
        (**self).delete_snapshot(id, force)
    }

    fn list_mount_points(&self, volume: &str) -> Result<Vec<String>> {
        (**self).list_mount_points(volume)
    }

    fn start_backup(&self, config: BackupConfig) -> Result<Box<dyn Backuper>> {
        (**self).start_backup(config)
    }

    fn close(&self) {
        (**self).close()
    }
}

const SERVER_START_ATTEMPTS: u32 = 20;
const SERVER_START_POLL: Duration = Duration::from_millis(250);

/// Where snapshot work happens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionType {
    /// Only in this process
    LocalOnly,
    /// Only through the snapshot server
    ServerOnly,
    /// In this process if possible, otherwise through the server
    #[default]
    LocalOrServer,
}

/// How to build a [`Snapshoter`]
#[derive(Clone)]
pub struct SnapshoterConfig {
    pub connection: ConnectionType,
    pub server_host: String,
    pub server_port: u16,
    /// Reply timeout for server calls other than snapshot creation
    pub call_timeout: Duration,
    pub info_callback: InfoCallback,
}

impl Default for SnapshoterConfig {
    fn default() -> Self {
        SnapshoterConfig {
            connection: ConnectionType::default(),
            server_host: rpc::DEFAULT_HOST.to_string(),
            server_port: rpc::DEFAULT_PORT,
            call_timeout: rpc::DEFAULT_CALL_TIMEOUT,
            info_callback: crate::info::tracing_callback(),
        }
    }
}

impl SnapshoterConfig {
    /// Whether the server endpoint is the one an on-demand server listens on
    pub fn is_default_endpoint(&self) -> bool {
        self.server_host == rpc::DEFAULT_HOST && self.server_port == rpc::DEFAULT_PORT
    }
}

/// Snapshoter implemented in this process for the current platform
pub fn new_local_snapshoter(info: InfoCallback) -> Result<Box<dyn Snapshoter>> {
    #[cfg(windows)]
    {
        let snapshoter = crate::vss::VssSnapshoter::new(crate::vss::ffi::ComFactory::new()?, info)?;
        Ok(Box::new(snapshoter))
    }

    #[cfg(target_os = "macos")]
    {
        let snapshoter = crate::tmutil::TmutilSnapshoter::new(info)?;
        Ok(Box::new(snapshoter))
    }

    #[cfg(not(any(windows, target_os = "macos")))]
    {
        let _ = info;
        Err(Error::Unsupported("snapshots not supported in this OS".into()))
    }
}

/// Build the snapshoter selected by `config`
pub fn new_snapshoter(config: &SnapshoterConfig) -> Result<Box<dyn Snapshoter>> {
    let info = &config.info_callback;

    match config.connection {
        ConnectionType::LocalOnly => new_local_snapshoter(info.clone()),
        ConnectionType::ServerOnly => Ok(Box::new(connect_to_server(config)?)),
        ConnectionType::LocalOrServer => match new_local_snapshoter(info.clone()) {
            Ok(local) => Ok(local),
            Err(local_err) => {
                info(
                    MessageLevel::Details,
                    &format!("Could not create local snapshoter: {}", local_err),
                );
                connect_to_server(config)
                    .map(|client| Box::new(client) as Box<dyn Snapshoter>)
                    .map_err(|server_err| {
                        info(
                            MessageLevel::Details,
                            &format!("Could not connect to server: {}", server_err),
                        );
                        local_err
                    })
            }
        },
    }
}

/// Like [`new_snapshoter`], but falls back to a [`NullSnapshoter`] so the
/// caller can keep going without snapshots
pub fn new_snapshoter_or_null(config: &SnapshoterConfig) -> (Box<dyn Snapshoter>, Option<Error>) {
    match new_snapshoter(config) {
        Ok(s) => (s, None),
        Err(e) => (Box::new(NullSnapshoter), Some(e)),
    }
}

/// Connect to the server, launching it once on demand for the default endpoint
pub(crate) fn connect_to_server(config: &SnapshoterConfig) -> Result<ClientSnapshoter> {
    let info = &config.info_callback;
    let host = &config.server_host;
    let port = config.server_port;

    let connect = || {
        ClientSnapshoter::connect(host, port, info.clone())
            .map(|c| c.with_call_timeout(config.call_timeout))
    };

    match connect() {
        Ok(client) => Ok(client),
        Err(e) if e.is_transport() && config.is_default_endpoint() => {
            info(
                MessageLevel::Details,
                &format!("Server not reachable ({}), trying to start it", e),
            );
            crate::launch::start_server_for_os(info)?;

            // The launched server needs a moment before it listens
            let mut last = e;
            for _ in 0..SERVER_START_ATTEMPTS {
                std::thread::sleep(SERVER_START_POLL);
                match connect() {
                    Ok(client) => return Ok(client),
                    Err(e) if e.is_transport() => last = e,
                    Err(e) => return Err(e),
                }
            }
            Err(last)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_targets_default_endpoint() {
        let config = SnapshoterConfig::default();
        assert_eq!(config.connection, ConnectionType::LocalOrServer);
        assert!(config.is_default_endpoint());

        let custom = SnapshoterConfig {
            server_port: 1,
            ..SnapshoterConfig::default()
        };
        assert!(!custom.is_default_endpoint());
    }

    #[test]
    fn test_connection_type_serializes_by_name() {
        let json = serde_json::to_string(&ConnectionType::ServerOnly).unwrap();
        assert_eq!(json, "\"ServerOnly\"");
    }

    #[cfg(not(any(windows, target_os = "macos")))]
    #[test]
    fn test_unsupported_platform_falls_back_to_null() {
        let config = SnapshoterConfig {
            connection: ConnectionType::LocalOnly,
            info_callback: crate::info::silent_callback(),
            ..SnapshoterConfig::default()
        };

        let (snapshoter, err) = new_snapshoter_or_null(&config);

        assert!(matches!(err, Some(Error::Unsupported(_))));
        assert!(snapshoter.list_snapshots("").unwrap().is_empty());
    }
}
