//! Snapshoter and backuper that forward every call to the snapshot server
//!
//! The client API is blocking, like the local snapshoters. Each client
//! owns a single-threaded runtime and one connection; calls take turns on
//! the connection and wait for the reply under a per-call timeout, passing
//! any progress messages streamed by the server to the info callback.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::runtime::Runtime;

use super::convert::{provider_from_wire, sets_from_wire, snapshots_from_wire};
use super::wire::{read_frame, write_frame, Frame, Reply, Request};
use super::{CONNECT_TIMEOUT, DEFAULT_CALL_TIMEOUT};
use crate::backup::{BaseBackuper, Backuper, CreatedSnapshot, SnapshotCreator};
use crate::error::{Error, Result};
use crate::info::{InfoCallback, MessageLevel};
use crate::model::{BackupConfig, Provider, Snapshot, SnapshotSet};
use crate::snapshoter::Snapshoter;

/// Extra time a snapshot creation call gets on top of the backup timeout
const CREATE_GRACE: Duration = Duration::from_secs(60);

fn to_transport(e: Error) -> Error {
    match e {
        Error::Io(io) => Error::Transport(io.to_string()),
        other => other,
    }
}

fn unexpected(request: &str, reply: Reply) -> Error {
    Error::Protocol(format!("unexpected reply to {}: {:?}", request, reply))
}

/// One connection to the server
struct Connection {
    runtime: Runtime,
    address: String,
    /// `None` after a failed exchange; the next call reconnects
    stream: Mutex<Option<TcpStream>>,
    closed: AtomicBool,
}

fn connect_stream(runtime: &Runtime, address: &str) -> Result<TcpStream> {
    runtime
        .block_on(async { tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(address)).await })
        .map_err(|_| Error::Transport(format!("could not connect to server {}: timed out", address)))?
        .map_err(|e| Error::Transport(format!("could not connect to server {}: {}", address, e)))
}

impl Connection {
    fn open(host: &str, port: u16) -> Result<Self> {
        let address = format!("{}:{}", host, port);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Transport(format!("could not start client runtime: {}", e)))?;

        let stream = connect_stream(&runtime, &address)?;

        Ok(Connection {
            runtime,
            address,
            stream: Mutex::new(Some(stream)),
            closed: AtomicBool::new(false),
        })
    }

    fn call(&self, request: Request, timeout: Duration, info: &InfoCallback) -> Result<Reply> {
        let name = request.name();
        info(
            MessageLevel::Trace,
            &format!("Sending server request: {:?}", request),
        );

        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Transport(format!(
                "connection to server {} is closed",
                self.address
            )));
        }

        let mut guard = self.stream.lock();
        if guard.is_none() {
            info(
                MessageLevel::Details,
                &format!("Reconnecting to server at: {}", self.address),
            );
            *guard = Some(connect_stream(&self.runtime, &self.address)?);
        }
        let stream = guard
            .as_mut()
            .ok_or_else(|| Error::Transport(format!("not connected to server {}", self.address)))?;

        let result = self.runtime.block_on(async {
            match tokio::time::timeout(timeout, exchange(stream, &request, info)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(format!("{} request to server", name))),
            }
        });

        if let Err(e) = &result {
            info(MessageLevel::Trace, &format!("Server error: {}", e));

            // A failed exchange leaves unread frames behind
            if !matches!(e, Error::Remote(_)) {
                *guard = None;
            }
        }

        result
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.stream.lock().take();
    }
}

async fn exchange(stream: &mut TcpStream, request: &Request, info: &InfoCallback) -> Result<Reply> {
    write_frame(stream, request).await.map_err(to_transport)?;

    loop {
        let frame: Option<Frame> = read_frame(stream).await.map_err(to_transport)?;
        match frame {
            None => return Err(Error::Transport("connection closed by server".into())),
            Some(Frame::Message { level, text }) => info(level, &text),
            Some(Frame::Result(reply)) => return Ok(reply),
            Some(Frame::Error(message)) => return Err(Error::Remote(message)),
        }
    }
}

/// [`Snapshoter`] served by a remote snapshot server
pub struct ClientSnapshoter {
    conn: Arc<Connection>,
    info: InfoCallback,
    call_timeout: Duration,
}

impl ClientSnapshoter {
    /// Connect, waiting at most one second
    pub fn connect(host: &str, port: u16, info: InfoCallback) -> Result<Self> {
        info(
            MessageLevel::Trace,
            &format!("Connecting to server at: {}:{}", host, port),
        );

        let conn = Connection::open(host, port).map_err(|e| {
            info(MessageLevel::Trace, &format!("Server error: {}", e));
            e
        })?;

        info(
            MessageLevel::Details,
            &format!("Connected to server at: {}", conn.address),
        );

        Ok(ClientSnapshoter {
            conn: Arc::new(conn),
            info,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        })
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    fn call(&self, request: Request) -> Result<Reply> {
        self.conn.call(request, self.call_timeout, &self.info)
    }

    /// Whether the server is able to create snapshots
    pub fn can_create_snapshots(&self) -> Result<bool> {
        match self.call(Request::CanCreateSnapshots)? {
            Reply::CanCreate(can) => Ok(can),
            other => Err(unexpected("CanCreateSnapshots", other)),
        }
    }
}

impl Snapshoter for ClientSnapshoter {
    fn list_providers(&self, filter_id: &str) -> Result<Vec<Provider>> {
        match self.call(Request::ListProviders {
            filter_id: filter_id.to_string(),
        })? {
            Reply::Providers(providers) => Ok(providers.into_iter().map(provider_from_wire).collect()),
            other => Err(unexpected("ListProviders", other)),
        }
    }

    fn list_sets(&self, filter_id: &str) -> Result<Vec<SnapshotSet>> {
        match self.call(Request::ListSets {
            filter_id: filter_id.to_string(),
        })? {
            Reply::Sets(sets) => sets_from_wire(sets),
            other => Err(unexpected("ListSets", other)),
        }
    }

    fn list_snapshots(&self, filter_id: &str) -> Result<Vec<Snapshot>> {
        match self.call(Request::ListSnapshots {
            filter_id: filter_id.to_string(),
        })? {
            Reply::Snapshots(snapshots) => snapshots_from_wire(snapshots),
            other => Err(unexpected("ListSnapshots", other)),
        }
    }

    fn simplify_id(&self, id: &str) -> String {
        match self.call(Request::SimplifyId { id: id.to_string() }) {
            Ok(Reply::SimpleId(simple)) => simple,
            // Purely cosmetic, the full id will do
            _ => id.to_string(),
        }
    }

    fn delete_set(&self, id: &str, force: bool) -> Result<bool> {
        match self.call(Request::DeleteSet {
            id: id.to_string(),
            force,
        })? {
            Reply::Deleted(deleted) => Ok(deleted),
            other => Err(unexpected("DeleteSet", other)),
        }
    }

    fn delete_snapshot(&self, id: &str, force: bool) -> Result<bool> {
        match self.call(Request::DeleteSnapshot {
            id: id.to_string(),
            force,
        })? {
            Reply::Deleted(deleted) => Ok(deleted),
            other => Err(unexpected("DeleteSnapshot", other)),
        }
    }

    fn list_mount_points(&self, volume: &str) -> Result<Vec<String>> {
        list_mount_points(&self.conn, volume, self.call_timeout, &self.info)
    }

    fn start_backup(&self, config: BackupConfig) -> Result<Box<dyn Backuper>> {
        let info = config.info_callback.unwrap_or_else(|| self.info.clone());

        let reply = self.conn.call(
            Request::StartBackup {
                provider_id: config.provider_id,
                timeout_secs: config.timeout.as_secs(),
                simple: config.simple,
            },
            self.call_timeout,
            &info,
        )?;

        let (session_id, case_sensitive) = match reply {
            Reply::BackupStarted {
                session_id,
                case_sensitive,
            } => (session_id, case_sensitive),
            other => return Err(unexpected("StartBackup", other)),
        };

        let creator = RemoteCreator {
            conn: self.conn.clone(),
            session_id,
            case_sensitive,
            create_timeout: config.timeout + CREATE_GRACE,
            call_timeout: self.call_timeout,
            info: info.clone(),
        };

        Ok(Box::new(ClientBackuper {
            base: BaseBackuper::new(creator, info),
            closed: AtomicBool::new(false),
        }))
    }

    fn close(&self) {
        self.conn.close();
    }
}

fn list_mount_points(
    conn: &Connection,
    volume: &str,
    timeout: Duration,
    info: &InfoCallback,
) -> Result<Vec<String>> {
    match conn.call(
        Request::ListMountPoints {
            volume: volume.to_string(),
        },
        timeout,
        info,
    )? {
        Reply::MountPoints(mount_points) => Ok(mount_points),
        other => Err(unexpected("ListMountPoints", other)),
    }
}

/// Asks the server's session to snapshot a mount point
struct RemoteCreator {
    conn: Arc<Connection>,
    session_id: u32,
    case_sensitive: bool,
    create_timeout: Duration,
    call_timeout: Duration,
    info: InfoCallback,
}

impl SnapshotCreator for RemoteCreator {
    fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    fn list_mount_points(&self, volume: &str) -> Result<Vec<String>> {
        list_mount_points(&self.conn, volume, self.call_timeout, &self.info)
    }

    fn create_snapshot(&self, mount_point: &str) -> Result<CreatedSnapshot> {
        let reply = self.conn.call(
            Request::TryToCreateTemporarySnapshot {
                session_id: self.session_id,
                dir: mount_point.to_string(),
            },
            self.create_timeout,
            &self.info,
        )?;

        let snapshot_path = match reply {
            Reply::SnapshotPath(path) if !path.is_empty() => path,
            other => return Err(unexpected("TryToCreateTemporarySnapshot", other)),
        };

        // The server session owns the snapshot and releases it on CloseBackup
        Ok(CreatedSnapshot::unowned(Snapshot {
            id: String::new(),
            original_path: mount_point.to_string(),
            snapshot_path,
            creation_time: Utc::now(),
            set: None,
            provider: None,
            state: "created".to_string(),
            attributes: String::new(),
        }))
    }
}

/// Backup session living in the server
pub struct ClientBackuper {
    base: BaseBackuper<RemoteCreator>,
    closed: AtomicBool,
}

impl ClientBackuper {
    pub fn session_id(&self) -> u32 {
        self.base.creator().session_id
    }
}

impl Backuper for ClientBackuper {
    fn try_to_create_temporary_snapshot(&self, dir: &Path) -> Result<PathBuf> {
        self.base.try_to_create_temporary_snapshot(dir)
    }

    fn list_snapshoted_directories(&self) -> BTreeMap<String, String> {
        self.base.list_snapshoted_directories()
    }

    fn case_sensitive(&self) -> bool {
        self.base.case_sensitive()
    }

    fn close(&self) {
        self.base.close();

        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let creator = self.base.creator();
        let result = creator.conn.call(
            Request::CloseBackup {
                session_id: creator.session_id,
            },
            creator.call_timeout,
            &creator.info,
        );

        if let Err(e) = result {
            (creator.info)(
                MessageLevel::Info,
                &format!("Error closing backup session {}: {}", creator.session_id, e),
            );
        }
    }
}
