//! Configuration management for fs-snapshot

use crate::error::{Error, Result};
use crate::info::InfoCallback;
use crate::model::{BackupConfig, DEFAULT_BACKUP_TIMEOUT};
use crate::rpc::{ServerConfig as RpcServerConfig, DEFAULT_CALL_TIMEOUT, DEFAULT_HOST, DEFAULT_PORT};
use crate::snapshoter::{ConnectionType, SnapshoterConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Snapshot server configuration
    pub server: ServerConfig,

    /// Backup session defaults
    pub backup: BackupSettings,

    /// Where snapshots are created
    pub connection: ConnectionType,
}

/// Snapshot server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on / connect to; `0.0.0.0` listens on all interfaces
    pub host: String,

    /// TCP port
    pub port: u16,

    /// Stop the server after this many idle seconds (0 = never)
    pub inactivity_secs: u64,

    /// Client timeout for server calls, in seconds
    pub call_timeout_secs: u64,
}

/// Backup session defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    /// Provider to use; empty selects the default one
    pub provider_id: String,

    /// Budget for each snapshot transaction, in seconds
    pub timeout_secs: u64,

    /// Skip writer coordination
    pub simple: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            inactivity_secs: 0,
            call_timeout_secs: DEFAULT_CALL_TIMEOUT.as_secs(),
        }
    }
}

impl Default for BackupSettings {
    fn default() -> Self {
        BackupSettings {
            provider_id: String::new(),
            timeout_secs: DEFAULT_BACKUP_TIMEOUT.as_secs(),
            simple: false,
        }
    }
}

/// Split `host:port`
pub fn parse_endpoint(value: &str) -> Result<(String, u16)> {
    let (host, port) = value
        .trim()
        .rsplit_once(':')
        .ok_or_else(|| Error::InvalidConfig(format!("expected host:port, got '{}'", value)))?;

    let port = port
        .parse::<u16>()
        .map_err(|e| Error::InvalidConfig(format!("invalid port in '{}': {}", value, e)))?;

    if host.is_empty() {
        return Err(Error::InvalidConfig(format!("missing host in '{}'", value)));
    }

    Ok((host.to_string(), port))
}

impl Config {
    /// `<config dir>/fs-snapshot/config.json`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fs-snapshot")
            .join("config.json")
    }

    /// Load configuration from a file, with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!("Failed to read config file: {}", e))
        })?;

        let mut config: Config = serde_json::from_str(&content).map_err(|e| {
            Error::Config(format!("Failed to parse config file: {}", e))
        })?;

        config.apply_env_overrides()?;

        config.validate()?;
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            return Self::load(path);
        }

        let mut config = Config::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(endpoint) = var("FS_SNAPSHOT_SERVER") {
            let (host, port) = parse_endpoint(&endpoint)?;
            self.server.host = host;
            self.server.port = port;
        }

        if let Some(secs) = var("FS_SNAPSHOT_INACTIVITY") {
            if let Ok(secs) = secs.trim().parse::<u64>() {
                self.server.inactivity_secs = secs;
            }
        }

        if let Some(secs) = var("FS_SNAPSHOT_TIMEOUT") {
            if let Ok(secs) = secs.trim().parse::<u64>() {
                self.backup.timeout_secs = secs;
            }
        }

        Ok(())
    }

    /// Save configuration to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            Error::Config(format!("Failed to serialize config: {}", e))
        })?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| {
            Error::Config(format!("Failed to write config file: {}", e))
        })?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(Error::InvalidConfig("Server host is required".to_string()));
        }

        if self.server.port == 0 {
            return Err(Error::InvalidConfig(
                "Server port must be greater than 0".to_string(),
            ));
        }

        if self.backup.timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "Backup timeout must be greater than 0".to_string(),
            ));
        }

        if self.server.call_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "Call timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// How clients pick and reach a snapshoter
    pub fn snapshoter_config(&self, info: InfoCallback) -> SnapshoterConfig {
        SnapshoterConfig {
            connection: self.connection,
            server_host: self.server.host.clone(),
            server_port: self.server.port,
            call_timeout: Duration::from_secs(self.server.call_timeout_secs),
            info_callback: info,
        }
    }

    /// Options for a new backup session
    pub fn backup_config(&self) -> BackupConfig {
        BackupConfig {
            provider_id: self.backup.provider_id.clone(),
            timeout: Duration::from_secs(self.backup.timeout_secs),
            simple: self.backup.simple,
            info_callback: None,
        }
    }

    /// Options for running the server
    pub fn rpc_server_config(&self, info: InfoCallback) -> RpcServerConfig {
        RpcServerConfig {
            host: self.server.host.clone(),
            port: self.server.port,
            inactivity: Duration::from_secs(self.server.inactivity_secs),
            info_callback: info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 33721);
        assert_eq!(config.server.inactivity_secs, 0);
        assert_eq!(config.backup.timeout_secs, 120);
        assert_eq!(config.connection, ConnectionType::LocalOrServer);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(vars(&[
                ("FS_SNAPSHOT_SERVER", "0.0.0.0:4000"),
                ("FS_SNAPSHOT_INACTIVITY", " 30 "),
                ("FS_SNAPSHOT_TIMEOUT", "not a number"),
            ]))
            .unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.server.inactivity_secs, 30);
        assert_eq!(config.backup.timeout_secs, 120);
    }

    #[test]
    fn test_bad_endpoint_is_invalid_config() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(vars(&[("FS_SNAPSHOT_SERVER", "localhost")]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));

        assert!(parse_endpoint("localhost:99999").is_err());
        assert!(parse_endpoint(":80").is_err());
        assert_eq!(
            parse_endpoint("localhost:80").unwrap(),
            ("localhost".to_string(), 80)
        );
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.backup.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.backup.simple = true;
        config.connection = ConnectionType::ServerOnly;
        config.save(&path).unwrap();

        let loaded: Config =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"server": {"port": 5000}}"#).unwrap();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.backup.timeout_secs, 120);
    }

    #[test]
    fn test_derived_configs() {
        let mut config = Config::default();
        config.server.inactivity_secs = 90;
        config.backup.provider_id = "b594613".to_string();

        let backup = config.backup_config();
        assert_eq!(backup.provider_id, "b594613");
        assert_eq!(backup.timeout, Duration::from_secs(120));

        let server = config.rpc_server_config(crate::info::silent_callback());
        assert_eq!(server.inactivity, Duration::from_secs(90));
        assert_eq!(server.address(), "127.0.0.1:33721");

        let snapshoter = config.snapshoter_config(crate::info::silent_callback());
        assert!(snapshoter.is_default_endpoint());
    }

    #[test]
    fn test_load_reports_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
