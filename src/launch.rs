//! On-demand start of the privileged snapshot server
//!
//! On Windows the server is installed as a scheduled task running under
//! an account with backup privileges; starting the task starts the server,
//! which stops itself again once idle. Other platforms cannot elevate on
//! demand.

use crate::error::{Error, Result};
use crate::info::{InfoCallback, MessageLevel};
use crate::snapshoter::{connect_to_server, new_local_snapshoter, SnapshoterConfig};

/// Name of the scheduled task that starts the server for `username`
pub fn scheduled_task_name(username: &str) -> String {
    format!(r"\fs_stapshot\server start ({})", username.replace('\\', "_"))
}

/// Account the process runs as, `DOMAIN\user` on Windows
pub fn current_username() -> Result<String> {
    #[cfg(windows)]
    {
        let user = std::env::var("USERNAME")
            .map_err(|_| Error::custom("USERNAME is not set"))?;
        Ok(match std::env::var("USERDOMAIN") {
            Ok(domain) if !domain.is_empty() => format!("{}\\{}", domain, user),
            _ => user,
        })
    }

    #[cfg(unix)]
    {
        let uid = nix::unistd::geteuid();
        let user = nix::unistd::User::from_uid(uid).map_err(|e| Error::custom(e.to_string()))?;
        Ok(user.map(|u| u.name).unwrap_or_else(|| uid.to_string()))
    }

    #[cfg(not(any(windows, unix)))]
    {
        Err(Error::Unsupported("unknown user on this OS".into()))
    }
}

/// Ask the OS to start the privileged server for the current user
pub fn start_server_for_os(info: &InfoCallback) -> Result<()> {
    #[cfg(windows)]
    {
        let task = scheduled_task_name(&current_username()?);
        crate::process::run(info, "schtasks", &["/Run", "/TN", &task, "/HRESULT"]).map_err(|e| {
            info(
                MessageLevel::Trace,
                &format!("Error running scheduled task: {}", e),
            );
            e
        })
    }

    #[cfg(target_os = "macos")]
    {
        info(
            MessageLevel::Trace,
            "Servers can't be started on demand in macOS",
        );
        Err(Error::Unsupported(
            "can't start server with elevated privileges - run with sudo if needed".into(),
        ))
    }

    #[cfg(not(any(windows, target_os = "macos")))]
    {
        let _ = info;
        Err(Error::Unsupported("snapshots not supported in this OS".into()))
    }
}

/// Whether snapshots can be created here, either directly or through the
/// server (started on demand for the default endpoint)
pub fn current_user_can_create_snapshots(config: &SnapshoterConfig) -> Result<bool> {
    let info = &config.info_callback;

    let local_err = match new_local_snapshoter(info.clone()) {
        Ok(local) => {
            local.close();
            return Ok(true);
        }
        Err(e) => e,
    };

    info(
        MessageLevel::Details,
        &format!("Can't create snapshots in this process: {}", local_err),
    );
    info(
        MessageLevel::Info,
        &format!(
            "Trying to open connection to server at: {}:{}",
            config.server_host, config.server_port
        ),
    );

    let reachable = connect_to_server(config).and_then(|client| {
        let can = client.can_create_snapshots();
        crate::snapshoter::Snapshoter::close(&client);
        can
    });

    match reachable {
        Ok(can) => Ok(can),
        Err(server_err) => {
            info(
                MessageLevel::Details,
                &format!("Server not available: {}", server_err),
            );
            match local_err {
                Error::Unsupported(_) => Err(local_err),
                _ => Ok(false),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_name_flattens_domain() {
        assert_eq!(
            scheduled_task_name(r"CORP\alice"),
            r"\fs_stapshot\server start (CORP_alice)"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_current_username_is_known() {
        assert!(!current_username().unwrap().is_empty());
    }

    #[cfg(not(any(windows, target_os = "macos")))]
    #[test]
    fn test_no_on_demand_start() {
        let err = start_server_for_os(&crate::info::silent_callback()).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }
}
