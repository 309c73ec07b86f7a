#![allow(dead_code)]

use lt_core::app_error::{AppError, AppResult};
use lt_core::image_store::LocalImageStore;
use lt_core::local_store::{Collection, LocalState, LocalStore};
use lt_core::notify::{FixedConfirm, RecordingNotifier};
use lt_core::remote::{ConnectionCheck, RemoteEntry, RemoteObjectBackend, SyncTargetUri};
use lt_core::remote_fs::FsBackend;
use lt_core::sync::SyncOrchestrator;
use lt_core::sync_config::SqliteSyncConfigStore;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub struct Fixture {
    pub store: LocalStore,
    pub images: LocalImageStore,
    pub config: SqliteSyncConfigStore,
    pub remote: FsBackend,
    pub notifier: RecordingNotifier,
    pub accept: FixedConfirm,
    pub decline: FixedConfirm,
    pub dir: tempfile::TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = dir.path().join("device/db/local.sqlite");
        Self {
            store: LocalStore::open(&db).expect("open store"),
            images: LocalImageStore::new(dir.path().join("device/images")),
            config: SqliteSyncConfigStore::open(&db).expect("open config"),
            remote: FsBackend::new(&dir.path().join("remote")),
            notifier: RecordingNotifier::default(),
            accept: FixedConfirm(true),
            decline: FixedConfirm(false),
            dir,
        }
    }

    pub fn orchestrator<'a>(&'a self, backend: &'a dyn RemoteObjectBackend) -> SyncOrchestrator<'a> {
        SyncOrchestrator::new(&self.store, &self.images, backend, &self.config)
            .with_notifier(&self.notifier)
            .with_confirm(&self.decline)
    }

    pub fn local_orchestrator(&self) -> SyncOrchestrator<'_> {
        SyncOrchestrator::local(&self.store, &self.images, &self.config).with_notifier(&self.notifier)
    }

    pub fn remote_path(&self, name: &str) -> std::path::PathBuf {
        self.remote.root.join(name)
    }
}

pub fn log(id: &str, images: &[&str]) -> Value {
    json!({ "id": id, "title": format!("log {id}"), "images": images })
}

pub fn state_with_logs(count: usize) -> LocalState {
    let logs = (0..count).map(|i| log(&format!("l{i}"), &[])).collect();
    LocalState::empty().with(Collection::Logs, logs)
}

pub fn set_mtime(path: &Path, epoch_secs: u64) {
    let file = std::fs::File::options()
        .write(true)
        .open(path)
        .expect("open for mtime");
    file.set_modified(UNIX_EPOCH + Duration::from_secs(epoch_secs))
        .expect("set mtime");
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_secs()
}

/// Wraps a filesystem backend, counting calls and failing the operations it
/// is told to fail.
pub struct FaultyBackend {
    pub inner: FsBackend,
    pub fail_upload_prefix: Option<String>,
    pub fail_download: bool,
    pub fail_delete: Vec<String>,
    pub only_trailing_slash_listing: bool,
    pub calls: AtomicUsize,
}

impl FaultyBackend {
    pub fn new(inner: &FsBackend) -> Self {
        Self {
            inner: inner.clone(),
            fail_upload_prefix: None,
            fail_download: false,
            fail_delete: Vec::new(),
            only_trailing_slash_listing: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn injected(op: &str, name: &str) -> AppError {
        AppError::new(
            "LT_SYNC_NETWORK_FAILED",
            "sync",
            "injected failure",
            true,
            json!({ "op": op, "name": name }),
        )
    }
}

impl RemoteObjectBackend for FaultyBackend {
    fn target(&self) -> SyncTargetUri {
        self.inner.target()
    }

    fn upload_blob(&self, name: &str, bytes: &[u8], content_type: &str) -> AppResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(prefix) = &self.fail_upload_prefix {
            if name.starts_with(prefix.as_str()) {
                return Err(Self::injected("upload", name));
            }
        }
        self.inner.upload_blob(name, bytes, content_type)
    }

    fn download_blob(&self, name: &str) -> AppResult<Option<Vec<u8>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_download {
            return Err(Self::injected("download", name));
        }
        self.inner.download_blob(name)
    }

    fn list_entries(&self, prefix: &str) -> AppResult<Vec<RemoteEntry>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.only_trailing_slash_listing && !prefix.is_empty() && !prefix.ends_with('/') {
            return Ok(Vec::new());
        }
        self.inner.list_entries(prefix)
    }

    fn delete_blob(&self, name: &str) -> AppResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete.iter().any(|n| n == name) {
            return Err(Self::injected("delete", name));
        }
        self.inner.delete_blob(name)
    }

    fn test_connection(&self) -> AppResult<ConnectionCheck> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.test_connection()
    }
}
