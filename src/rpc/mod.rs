//! Privilege-separated snapshot service
//!
//! Creating snapshots usually requires elevated privileges. The server
//! runs with them and exposes a local [`Snapshoter`](crate::snapshoter::Snapshoter)
//! over TCP; unprivileged processes use [`ClientSnapshoter`], which
//! implements the same trait. Progress messages produced while the server
//! works are streamed back to the caller's info callback.

mod activity;
mod client;
mod convert;
mod server;
pub mod wire;

pub use client::{ClientBackuper, ClientSnapshoter};
pub use server::{Server, ServerConfig, StopHandle};

use std::time::Duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 33721;

/// How long a client waits for the TCP connection
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// How long a client waits for most replies
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);
