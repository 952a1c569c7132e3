//! Idle shutdown accounting for the server
//!
//! Request handlers report activity over a channel to a single monitor
//! task. While no command runs and no backup session is open the monitor
//! waits at most the inactivity window for the next event, and stops the
//! server if none arrives.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use crate::info::{InfoCallback, MessageLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    CommandStart,
    CommandEnd,
    BackupStart,
    BackupEnd,
}

/// Sending side of the monitor; a no-op when idle shutdown is disabled
#[derive(Clone)]
pub struct ActivityTracker {
    tx: Option<mpsc::UnboundedSender<Activity>>,
}

impl ActivityTracker {
    pub fn disabled() -> Self {
        ActivityTracker { tx: None }
    }

    pub fn send(&self, activity: Activity) {
        if let Some(tx) = &self.tx {
            // The monitor is gone once it stopped the server
            let _ = tx.send(activity);
        }
    }

    /// Reports a command start now and its end when the guard drops
    pub fn command(&self) -> CommandGuard {
        self.send(Activity::CommandStart);
        CommandGuard {
            tracker: self.clone(),
        }
    }
}

pub struct CommandGuard {
    tracker: ActivityTracker,
}

impl Drop for CommandGuard {
    fn drop(&mut self) {
        self.tracker.send(Activity::CommandEnd);
    }
}

/// Start the monitor. A zero `window` disables idle shutdown.
pub fn spawn_monitor(
    window: Duration,
    info: InfoCallback,
    shutdown: Arc<watch::Sender<bool>>,
) -> ActivityTracker {
    if window.is_zero() {
        return ActivityTracker::disabled();
    }

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(monitor(rx, window, info, shutdown));

    ActivityTracker { tx: Some(tx) }
}

async fn monitor(
    mut rx: mpsc::UnboundedReceiver<Activity>,
    window: Duration,
    info: InfoCallback,
    shutdown: Arc<watch::Sender<bool>>,
) {
    let mut commands: u32 = 0;
    let mut backups: u32 = 0;

    loop {
        let next = if commands == 0 && backups == 0 {
            info(
                MessageLevel::Trace,
                &format!("Starting to count inactivity period of {:?}", window),
            );

            match timeout(window, rx.recv()).await {
                Ok(next) => next,
                Err(_) => {
                    info(
                        MessageLevel::Output,
                        &format!("fs-snapshot server stopping after {:?} inactive", window),
                    );
                    let _ = shutdown.send(true);
                    return;
                }
            }
        } else {
            info(
                MessageLevel::Trace,
                &format!(
                    "Waiting for activity to end: {} commands and {} backups executing",
                    commands, backups
                ),
            );
            rx.recv().await
        };

        let Some(activity) = next else {
            return;
        };

        match activity {
            Activity::CommandStart => commands += 1,
            Activity::CommandEnd => commands = commands.saturating_sub(1),
            Activity::BackupStart => backups += 1,
            Activity::BackupEnd => backups = backups.saturating_sub(1),
        }
    }
}
