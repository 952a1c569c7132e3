//! Snapshot server
//!
//! Wraps a local [`Snapshoter`] and serves it over TCP, one task per
//! connection. Snapshoter calls block, so each request runs on the
//! blocking pool while the connection task streams the progress messages
//! it produces back to the client. Backup sessions live in the server and
//! are referenced by id.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use super::activity::{spawn_monitor, Activity, ActivityTracker};
use super::convert::{provider_to_wire, set_to_wire, snapshot_to_wire};
use super::wire::{read_frame, write_frame, Frame, Reply, Request};
use super::{DEFAULT_HOST, DEFAULT_PORT};
use crate::backup::Backuper;
use crate::error::{Error, Result};
use crate::info::{tee, InfoCallback, MessageLevel};
use crate::model::{BackupConfig, DEFAULT_BACKUP_TIMEOUT};
use crate::snapshoter::Snapshoter;

/// Where and how long the server runs
#[derive(Clone)]
pub struct ServerConfig {
    /// `0.0.0.0` listens on all interfaces
    pub host: String,
    pub port: u16,
    /// Stop after this long without activity; zero never stops
    pub inactivity: Duration,
    pub info_callback: InfoCallback,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            inactivity: Duration::ZERO,
            info_callback: crate::info::silent_callback(),
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

type Forward = Arc<Mutex<Option<mpsc::UnboundedSender<Frame>>>>;

/// A backup session and where its progress currently goes
struct Session {
    backuper: Box<dyn Backuper>,
    forward: Forward,
}

/// Routes a session's messages to one request's reply stream until dropped
struct Forwarding<'a> {
    forward: &'a Forward,
}

impl<'a> Forwarding<'a> {
    fn new(forward: &'a Forward, tx: &mpsc::UnboundedSender<Frame>) -> Self {
        *forward.lock() = Some(tx.clone());
        Forwarding { forward }
    }
}

impl Drop for Forwarding<'_> {
    fn drop(&mut self) {
        *self.forward.lock() = None;
    }
}

fn forwarding_callback(forward: Forward) -> InfoCallback {
    Arc::new(move |level: MessageLevel, text: &str| {
        if let Some(tx) = forward.lock().as_ref() {
            let _ = tx.send(Frame::Message {
                level,
                text: text.to_string(),
            });
        }
    })
}

struct ServerState {
    snapshoter: Arc<dyn Snapshoter>,
    sessions: DashMap<u32, Arc<Session>>,
    next_id: AtomicU32,
    activity: ActivityTracker,
    info: InfoCallback,
}

/// Signals a running server to stop
#[derive(Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }
}

pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
    stop: StopHandle,
    stopped: watch::Receiver<bool>,
}

impl Server {
    /// Bind the listening socket and start idle accounting
    pub async fn bind(snapshoter: Arc<dyn Snapshoter>, config: ServerConfig) -> Result<Self> {
        let address = config.address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| Error::Transport(format!("failed to listen to {}: {}", address, e)))?;

        let (tx, stopped) = watch::channel(false);
        let tx = Arc::new(tx);
        let activity = spawn_monitor(config.inactivity, config.info_callback.clone(), tx.clone());

        Ok(Server {
            listener,
            state: Arc::new(ServerState {
                snapshoter,
                sessions: DashMap::new(),
                next_id: AtomicU32::new(1),
                activity,
                info: config.info_callback,
            }),
            stop: StopHandle { tx },
            stopped,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Accept connections until stopped, then close any open session
    pub async fn serve(self) -> Result<()> {
        (self.state.info)(
            MessageLevel::Output,
            &format!("fs-snapshot server listening at: {}", self.local_addr()?),
        );

        let mut stopped = self.stopped.clone();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let state = self.state.clone();
                        tokio::spawn(async move {
                            match state.handle_connection(stream, peer).await {
                                Ok(()) => debug!("Connection from {} closed", peer),
                                Err(e) => debug!("Connection from {} closed: {}", peer, e),
                            }
                        });
                    }
                    Err(e) => warn!("Failed to accept connection: {}", e),
                },
                _ = stopped.changed() => break,
            }
        }

        let state = self.state.clone();
        tokio::task::spawn_blocking(move || state.close_all())
            .await
            .map_err(Error::custom)?;

        Ok(())
    }
}

impl ServerState {
    async fn handle_connection(self: Arc<Self>, mut stream: TcpStream, peer: SocketAddr) -> Result<()> {
        debug!("New connection from {}", peer);

        // Sessions started over this connection, closed if the client goes away
        let mut owned: Vec<u32> = Vec::new();

        let outcome = loop {
            let request: Request = match read_frame(&mut stream).await {
                Ok(Some(request)) => request,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            };
            trace!("Received request from {}: {:?}", peer, request);

            if let Request::CloseBackup { session_id } = request {
                owned.retain(|id| *id != session_id);
            }

            let _command = self.activity.command();
            let (tx, mut rx) = mpsc::unbounded_channel();

            let state = self.clone();
            tokio::task::spawn_blocking(move || {
                let frame = match state.dispatch(request, &tx) {
                    Ok(reply) => Frame::Result(reply),
                    Err(e) => Frame::Error(e.to_string()),
                };
                let _ = tx.send(frame);
            });

            let mut written = Ok(());
            while let Some(frame) = rx.recv().await {
                if let Frame::Result(Reply::BackupStarted { session_id, .. }) = &frame {
                    owned.push(*session_id);
                }

                let terminal = frame.is_terminal();
                trace!("Sending to {}: {:?}", peer, frame);
                if let Err(e) = write_frame(&mut stream, &frame).await {
                    written = Err(e);
                    break;
                }
                if terminal {
                    break;
                }
            }

            if let Err(e) = written {
                warn!("Error replying to {}: {}", peer, e);
                break Err(e);
            }
        };

        if !owned.is_empty() {
            let state = self.clone();
            tokio::task::spawn_blocking(move || {
                for id in owned {
                    debug!("Closing abandoned backup session {}", id);
                    state.close_session(id, None).ok();
                }
            })
            .await
            .map_err(Error::custom)?;
        }

        outcome
    }

    fn session(&self, id: u32) -> Result<Arc<Session>> {
        self.sessions
            .get(&id)
            .map(|s| s.value().clone())
            .ok_or(Error::UnknownSession(id))
    }

    fn dispatch(&self, request: Request, tx: &mpsc::UnboundedSender<Frame>) -> Result<Reply> {
        (self.info)(
            MessageLevel::Trace,
            &format!("Received request: {:?}", request),
        );

        let snapshoter = &self.snapshoter;

        match request {
            // A running server can create snapshots
            Request::CanCreateSnapshots => Ok(Reply::CanCreate(true)),

            Request::ListProviders { filter_id } => Ok(Reply::Providers(
                snapshoter
                    .list_providers(&filter_id)?
                    .iter()
                    .map(provider_to_wire)
                    .collect(),
            )),

            Request::ListSets { filter_id } => Ok(Reply::Sets(
                snapshoter.list_sets(&filter_id)?.iter().map(set_to_wire).collect(),
            )),

            Request::ListSnapshots { filter_id } => Ok(Reply::Snapshots(
                snapshoter
                    .list_snapshots(&filter_id)?
                    .iter()
                    .map(|s| snapshot_to_wire(s, true))
                    .collect(),
            )),

            Request::SimplifyId { id } => Ok(Reply::SimpleId(snapshoter.simplify_id(&id))),

            Request::DeleteSet { id, force } => Ok(Reply::Deleted(snapshoter.delete_set(&id, force)?)),

            Request::DeleteSnapshot { id, force } => {
                Ok(Reply::Deleted(snapshoter.delete_snapshot(&id, force)?))
            }

            Request::ListMountPoints { volume } => {
                Ok(Reply::MountPoints(snapshoter.list_mount_points(&volume)?))
            }

            Request::StartBackup {
                provider_id,
                timeout_secs,
                simple,
            } => self.start_backup(provider_id, timeout_secs, simple, tx),

            Request::TryToCreateTemporarySnapshot { session_id, dir } => {
                let session = self.session(session_id)?;
                let _forwarding = Forwarding::new(&session.forward, tx);

                let path = session
                    .backuper
                    .try_to_create_temporary_snapshot(Path::new(&dir))?;
                Ok(Reply::SnapshotPath(path.to_string_lossy().to_string()))
            }

            Request::CloseBackup { session_id } => {
                self.close_session(session_id, Some(tx))?;
                Ok(Reply::Closed)
            }
        }
    }

    fn start_backup(
        &self,
        provider_id: String,
        timeout_secs: u64,
        simple: bool,
        tx: &mpsc::UnboundedSender<Frame>,
    ) -> Result<Reply> {
        let forward: Forward = Arc::new(Mutex::new(None));

        let backuper = {
            let _forwarding = Forwarding::new(&forward, tx);
            self.snapshoter.start_backup(BackupConfig {
                provider_id,
                timeout: match timeout_secs {
                    0 => DEFAULT_BACKUP_TIMEOUT,
                    secs => Duration::from_secs(secs),
                },
                simple,
                info_callback: Some(tee(self.info.clone(), forwarding_callback(forward.clone()))),
            })?
        };

        let session_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let case_sensitive = backuper.case_sensitive();

        self.sessions
            .insert(session_id, Arc::new(Session { backuper, forward }));
        self.activity.send(Activity::BackupStart);

        debug!("Started backup session {}", session_id);
        Ok(Reply::BackupStarted {
            session_id,
            case_sensitive,
        })
    }

    fn close_session(&self, id: u32, tx: Option<&mpsc::UnboundedSender<Frame>>) -> Result<()> {
        let (_, session) = self.sessions.remove(&id).ok_or(Error::UnknownSession(id))?;

        {
            let _forwarding = tx.map(|tx| Forwarding::new(&session.forward, tx));
            session.backuper.close();
        }

        self.activity.send(Activity::BackupEnd);
        debug!("Closed backup session {}", id);
        Ok(())
    }

    fn close_all(&self) {
        let ids: Vec<u32> = self.sessions.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.close_session(id, None).ok();
        }
    }
}
