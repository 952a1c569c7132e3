//! Snapshot server and client talking over loopback

use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tempfile::TempDir;

use fs_snapshot::backup::{BaseBackuper, Backuper, CreatedSnapshot, SnapshotCreator};
use fs_snapshot::info::{InfoCallback, MessageLevel};
use fs_snapshot::model::{BackupConfig, Provider, SetInfo, Snapshot, SnapshotSet};
use fs_snapshot::rpc::{ClientSnapshoter, Server, ServerConfig, StopHandle};
use fs_snapshot::snapshoter::Snapshoter;
use fs_snapshot::{Error, Result};

struct Release(Arc<AtomicUsize>);

impl Drop for Release {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeCreator {
    root: String,
    created: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
    info: InfoCallback,
}

impl SnapshotCreator for FakeCreator {
    fn case_sensitive(&self) -> bool {
        true
    }

    fn list_mount_points(&self, _volume: &str) -> Result<Vec<String>> {
        Ok(vec![self.root.clone()])
    }

    fn create_snapshot(&self, mount_point: &str) -> Result<CreatedSnapshot> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        (self.info)(MessageLevel::Info, &format!("fake snapshot of {}", mount_point));

        let snapshot = Snapshot {
            id: format!("snap-{}", n),
            original_path: mount_point.to_string(),
            snapshot_path: format!("/snapshots/{}", n),
            creation_time: Utc::now(),
            set: None,
            provider: None,
            state: "Created".into(),
            attributes: String::new(),
        };
        Ok(CreatedSnapshot::new(snapshot, Release(self.released.clone())))
    }
}

/// In-memory snapshoter with one provider, one set of two snapshots and
/// a single mount point
struct FakeSnapshoter {
    root: String,
    created: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl FakeSnapshoter {
    fn new(root: &Path) -> Self {
        FakeSnapshoter {
            root: root.to_string_lossy().to_string(),
            created: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn snapshots(&self) -> Vec<Snapshot> {
        let set = Arc::new(SetInfo {
            id: "set-1".into(),
            creation_time: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            snapshot_count_on_creation: 2,
        });
        ["snap-a", "snap-b"]
            .iter()
            .map(|id| Snapshot {
                id: id.to_string(),
                original_path: self.root.clone(),
                snapshot_path: format!("/snapshots/{}", id),
                creation_time: set.creation_time,
                set: Some(set.clone()),
                provider: None,
                state: "Created".into(),
                attributes: "Persistent".into(),
            })
            .collect()
    }
}

impl Snapshoter for FakeSnapshoter {
    fn list_providers(&self, _filter_id: &str) -> Result<Vec<Provider>> {
        Ok(vec![Provider {
            id: "fake-provider".into(),
            name: "Fake".into(),
            version: "1.0".into(),
            provider_type: "test".into(),
        }])
    }

    fn list_sets(&self, _filter_id: &str) -> Result<Vec<SnapshotSet>> {
        let snapshots = self.snapshots();
        let info = snapshots[0].set.clone().ok_or_else(|| Error::custom("no set"))?;
        Ok(vec![SnapshotSet { info, snapshots }])
    }

    fn list_snapshots(&self, filter_id: &str) -> Result<Vec<Snapshot>> {
        Ok(self
            .snapshots()
            .into_iter()
            .filter(|s| filter_id.is_empty() || s.id == filter_id)
            .collect())
    }

    fn simplify_id(&self, id: &str) -> String {
        id.trim_start_matches("snap-").to_string()
    }

    fn delete_set(&self, _id: &str, _force: bool) -> Result<bool> {
        Err(Error::Unsupported("sets can't be deleted".into()))
    }

    fn delete_snapshot(&self, id: &str, _force: bool) -> Result<bool> {
        Ok(id == "snap-a")
    }

    fn list_mount_points(&self, _volume: &str) -> Result<Vec<String>> {
        Ok(vec![self.root.clone()])
    }

    fn start_backup(&self, config: BackupConfig) -> Result<Box<dyn Backuper>> {
        let info = config
            .info_callback
            .unwrap_or_else(fs_snapshot::info::silent_callback);
        let creator = FakeCreator {
            root: self.root.clone(),
            created: self.created.clone(),
            released: self.released.clone(),
            info: info.clone(),
        };
        Ok(Box::new(BaseBackuper::new(creator, info)))
    }

    fn close(&self) {}
}

struct RunningServer {
    port: u16,
    stop: StopHandle,
    thread: JoinHandle<()>,
}

impl RunningServer {
    fn start(snapshoter: Arc<dyn Snapshoter>) -> Self {
        let (tx, rx) = std::sync::mpsc::channel();

        let thread = std::thread::spawn(move || {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async move {
                let config = ServerConfig {
                    port: 0,
                    ..ServerConfig::default()
                };
                let server = Server::bind(snapshoter, config).await.unwrap();
                tx.send((server.local_addr().unwrap().port(), server.stop_handle()))
                    .unwrap();
                server.serve().await.unwrap();
            });
        });

        let (port, stop) = rx.recv().unwrap();
        RunningServer { port, stop, thread }
    }

    fn connect(&self, info: InfoCallback) -> ClientSnapshoter {
        ClientSnapshoter::connect("127.0.0.1", self.port, info).unwrap()
    }

    fn shutdown(self) {
        self.stop.stop();
        self.thread.join().unwrap();
    }
}

fn recording_callback() -> (InfoCallback, Arc<Mutex<Vec<String>>>) {
    let messages = Arc::new(Mutex::new(Vec::new()));
    let sink = messages.clone();
    let callback: InfoCallback = Arc::new(move |_level, msg: &str| sink.lock().push(msg.to_string()));
    (callback, messages)
}

fn volume() -> TempDir {
    let tmp = TempDir::new().unwrap();
    std::fs::create_dir_all(tmp.path().join("a/b")).unwrap();
    tmp
}

fn expected(snapshot: &str, relative: &str) -> PathBuf {
    PathBuf::from(fs_snapshot::paths::with_separator_suffix(
        &Path::new(snapshot).join(relative).to_string_lossy(),
    ))
}

fn wait_for(counter: &AtomicUsize, value: usize) -> bool {
    for _ in 0..100 {
        if counter.load(Ordering::SeqCst) == value {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    false
}

#[test]
fn test_listing_and_deleting_over_loopback() {
    let tmp = volume();
    let server = RunningServer::start(Arc::new(FakeSnapshoter::new(tmp.path())));
    let client = server.connect(fs_snapshot::info::silent_callback());

    assert!(client.can_create_snapshots().unwrap());

    let providers = client.list_providers("").unwrap();
    assert_eq!(providers.len(), 1);
    assert_eq!(providers[0].id, "fake-provider");

    let snapshots = client.list_snapshots("").unwrap();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0].set_id(), Some("set-1"));
    assert_eq!(snapshots[1].set_id(), Some("set-1"));

    let only_b = client.list_snapshots("snap-b").unwrap();
    assert_eq!(only_b.len(), 1);
    assert_eq!(only_b[0].snapshot_path, "/snapshots/snap-b");

    let sets = client.list_sets("").unwrap();
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].id(), "set-1");
    assert_eq!(sets[0].snapshots.len(), 2);

    assert_eq!(client.simplify_id("snap-a"), "a");
    assert!(client.delete_snapshot("snap-a", false).unwrap());
    assert!(!client.delete_snapshot("snap-z", false).unwrap());

    match client.delete_set("set-1", true) {
        Err(Error::Remote(message)) => assert!(message.contains("sets can't be deleted")),
        other => panic!("expected a remote error, got {:?}", other),
    }

    // A remote error leaves the connection usable
    assert_eq!(
        client.list_mount_points("").unwrap(),
        vec![tmp.path().to_string_lossy().to_string()]
    );

    client.close();
    server.shutdown();
}

#[test]
fn test_backup_session_streams_progress_and_releases_on_close() {
    let tmp = volume();
    let snapshoter = Arc::new(FakeSnapshoter::new(tmp.path()));
    let created = snapshoter.created.clone();
    let released = snapshoter.released.clone();

    let server = RunningServer::start(snapshoter);
    let (info, messages) = recording_callback();
    let client = server.connect(info);

    let backuper = client.start_backup(BackupConfig::default()).unwrap();
    assert!(backuper.case_sensitive());

    let deep = backuper
        .try_to_create_temporary_snapshot(&tmp.path().join("a/b"))
        .unwrap();
    assert_eq!(deep, expected("/snapshots/1", "a/b"));

    let shallow = backuper
        .try_to_create_temporary_snapshot(&tmp.path().join("a"))
        .unwrap();
    assert_eq!(shallow, expected("/snapshots/1", "a"));

    // One native snapshot for the mount point, reused for the second directory
    assert_eq!(created.load(Ordering::SeqCst), 1);

    let root = tmp.path().to_string_lossy().to_string();
    let progress = format!("fake snapshot of {}", root);
    assert!(messages.lock().iter().any(|m| m.starts_with(&progress)));

    assert_eq!(released.load(Ordering::SeqCst), 0);
    backuper.close();
    assert_eq!(released.load(Ordering::SeqCst), 1);

    // Closing twice is harmless and the session no longer hands out paths
    backuper.close();
    assert!(backuper
        .try_to_create_temporary_snapshot(&tmp.path().join("a"))
        .is_err());

    client.close();
    server.shutdown();
}

#[test]
fn test_abandoned_session_is_closed_when_client_disconnects() {
    let tmp = volume();
    let snapshoter = Arc::new(FakeSnapshoter::new(tmp.path()));
    let released = snapshoter.released.clone();

    let server = RunningServer::start(snapshoter);
    let client = server.connect(fs_snapshot::info::silent_callback());

    let backuper = client.start_backup(BackupConfig::default()).unwrap();
    backuper
        .try_to_create_temporary_snapshot(&tmp.path().join("a"))
        .unwrap();

    drop(backuper);
    drop(client);

    assert!(wait_for(&released, 1), "abandoned session was not closed");
    server.shutdown();
}

#[test]
fn test_sessions_are_closed_when_server_stops() {
    let tmp = volume();
    let snapshoter = Arc::new(FakeSnapshoter::new(tmp.path()));
    let released = snapshoter.released.clone();

    let server = RunningServer::start(snapshoter);
    let client = server.connect(fs_snapshot::info::silent_callback());

    let backuper = client.start_backup(BackupConfig::default()).unwrap();
    backuper
        .try_to_create_temporary_snapshot(&tmp.path().join("a"))
        .unwrap();

    server.shutdown();
    assert_eq!(released.load(Ordering::SeqCst), 1);

    drop(backuper);
    drop(client);
}
