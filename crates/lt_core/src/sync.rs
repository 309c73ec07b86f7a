use crate::app_error::{AppError, AppResult};
use crate::backup::{
    cleanup_old_backups, create_backup, BackupCleanupReportV1, BackupRecordV1, LABEL_LOCAL_BACKUP,
    LABEL_PRE_RESTORE, LABEL_STARTUP_BACKUP,
};
use crate::image_store::LocalImageStore;
use crate::images::{
    cleanup_unreferenced_images, compute_referenced_set, download_image_list,
    generate_cleanup_report, reconcile_after_restore, record_image_deletions,
    sweep_deleted_images, sync_referenced_images, upload_image_list, CleanupOptions,
    ImageCleanupReportV1, ImageCleanupResultV1, ImageSyncResultV1,
};
use crate::local_store::{Collection, LocalStore};
use crate::notify::{ConfirmPrompt, FixedConfirm, NotificationV1, Notifier, TracingNotifier};
use crate::remote::{RemoteObjectBackend, JSON_CONTENT_TYPE, ROOT_SNAPSHOT_NAME};
use crate::snapshot::{
    apply_snapshot, encode_snapshot, parse_snapshot, produce_snapshot, snapshot_fingerprint,
    Snapshot,
};
use crate::sync_config::{last_check_ms, last_sync_ms, record_last_sync, SyncConfigStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

pub const PHASE_BACKUP: &str = "backup";
pub const PHASE_FETCH: &str = "fetch";
pub const PHASE_APPLY: &str = "apply";
pub const PHASE_IMAGE_SYNC: &str = "image_sync";
pub const PHASE_UPLOAD: &str = "upload";
pub const PHASE_CLEANUP: &str = "cleanup";

static TRACING_NOTIFIER: TracingNotifier = TracingNotifier;
static DECLINE: FixedConfirm = FixedConfirm(false);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    Restore,
    Upload,
    InSync,
}

/// Remote strictly newer restores, local strictly newer uploads.
pub fn decide_sync_direction(local_ms: i64, remote_ms: i64) -> SyncDirection {
    if remote_ms > local_ms {
        SyncDirection::Restore
    } else if local_ms > remote_ms {
        SyncDirection::Upload
    } else {
        SyncDirection::InSync
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuickSyncMode {
    Startup,
    Resume,
    Manual,
    Auto,
}

impl QuickSyncMode {
    fn backup_label(self) -> &'static str {
        match self {
            QuickSyncMode::Startup => LABEL_STARTUP_BACKUP,
            _ => LABEL_PRE_RESTORE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResultV1 {
    pub target: String,
    pub name: String,
    pub fingerprint: String,
    pub timestamp: i64,
    pub size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStatus {
    Restored,
    NothingToRestore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadResultV1 {
    pub status: RestoreStatus,
    pub backup: Option<BackupRecordV1>,
    pub proceeded_without_backup: bool,
    pub snapshot_timestamp: Option<i64>,
    pub restored_counts: BTreeMap<String, usize>,
    pub images: Option<ImageSyncResultV1>,
    pub image_sync_error: Option<AppError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuickSyncResultV1 {
    pub mode: QuickSyncMode,
    pub direction: SyncDirection,
    pub local_timestamp: i64,
    pub remote_timestamp: Option<i64>,
    pub backup: Option<BackupRecordV1>,
    pub upload: Option<UploadResultV1>,
    pub images: Option<ImageSyncResultV1>,
    pub image_list_uploaded: bool,
    pub image_sync_error: Option<AppError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatusV1 {
    pub target: String,
    pub remote_timestamp: Option<i64>,
    pub local_last_modified_ms: i64,
    pub last_sync_ms: Option<i64>,
    pub last_check_ms: Option<i64>,
    pub direction: SyncDirection,
}

fn restored_counts(snapshot: &Snapshot) -> BTreeMap<String, usize> {
    Collection::ALL
        .into_iter()
        .map(|c| (c.key().to_string(), snapshot.collection(c).len()))
        .collect()
}

/// Runs sync operations against one backend. Each public operation emits
/// exactly one notification describing its terminal outcome.
pub struct SyncOrchestrator<'a> {
    store: &'a LocalStore,
    images: &'a LocalImageStore,
    backend: Option<&'a dyn RemoteObjectBackend>,
    config: &'a dyn SyncConfigStore,
    notifier: &'a dyn Notifier,
    confirm: &'a dyn ConfirmPrompt,
}

impl<'a> SyncOrchestrator<'a> {
    pub fn new(
        store: &'a LocalStore,
        images: &'a LocalImageStore,
        backend: &'a dyn RemoteObjectBackend,
        config: &'a dyn SyncConfigStore,
    ) -> Self {
        Self {
            backend: Some(backend),
            ..Self::local(store, images, config)
        }
    }

    /// No endpoint attached; only local image maintenance succeeds, every
    /// other operation fails with `LT_SYNC_NOT_CONNECTED`.
    pub fn local(
        store: &'a LocalStore,
        images: &'a LocalImageStore,
        config: &'a dyn SyncConfigStore,
    ) -> Self {
        Self {
            store,
            images,
            backend: None,
            config,
            notifier: &TRACING_NOTIFIER,
            confirm: &DECLINE,
        }
    }

    pub fn with_notifier(mut self, notifier: &'a dyn Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_confirm(mut self, confirm: &'a dyn ConfirmPrompt) -> Self {
        self.confirm = confirm;
        self
    }

    fn finish<T>(
        &self,
        operation: &str,
        result: AppResult<T>,
        describe: impl FnOnce(&T) -> NotificationV1,
    ) -> AppResult<T> {
        match &result {
            Ok(value) => self.notifier.notify(describe(value)),
            Err(err) => {
                tracing::warn!(operation, code = %err.code, phase = ?err.phase(), "sync operation failed");
                self.notifier.notify(NotificationV1::failure(operation, err));
            }
        }
        result
    }

    fn remote(&self) -> AppResult<&'a dyn RemoteObjectBackend> {
        self.backend.ok_or_else(|| {
            AppError::new(
                "LT_SYNC_NOT_CONNECTED",
                "config",
                "operation needs a connected sync endpoint",
                false,
                serde_json::json!({}),
            )
        })
    }

    fn logs(&self) -> AppResult<Vec<Value>> {
        self.store.collection(Collection::Logs)?.ok_or_else(|| {
            AppError::new(
                "LT_LOCAL_STATE_INVALID",
                "local_store",
                "logs collection is not initialized",
                false,
                serde_json::json!({ "missing": ["logs"] }),
            )
        })
    }

    fn fetch_remote_snapshot(&self) -> AppResult<Option<Snapshot>> {
        let bytes = self
            .remote()?
            .download_blob(ROOT_SNAPSHOT_NAME)
            .map_err(|e| e.in_phase(PHASE_FETCH))?;
        bytes
            .map(|b| parse_snapshot(&b))
            .transpose()
            .map_err(|e| e.in_phase(PHASE_FETCH))
    }

    fn upload_snapshot(&self, now_ms: i64) -> AppResult<UploadResultV1> {
        let backend = self.remote()?;
        let snapshot = produce_snapshot(self.store, now_ms).map_err(|e| e.in_phase(PHASE_UPLOAD))?;
        let bytes = encode_snapshot(&snapshot).map_err(|e| e.in_phase(PHASE_UPLOAD))?;
        backend
            .upload_blob(ROOT_SNAPSHOT_NAME, &bytes, JSON_CONTENT_TYPE)
            .map_err(|e| e.in_phase(PHASE_UPLOAD))?;
        record_last_sync(self.config, now_ms)?;
        self.store.set_last_modified(snapshot.timestamp)?;
        let target = backend.target().display();
        tracing::info!(remote = %target, size = bytes.len(), "snapshot uploaded");
        Ok(UploadResultV1 {
            target,
            name: ROOT_SNAPSHOT_NAME.to_string(),
            fingerprint: snapshot_fingerprint(&bytes),
            timestamp: snapshot.timestamp,
            size: bytes.len(),
        })
    }

    fn restore(&self, snapshot: &Snapshot, now_ms: i64) -> AppResult<()> {
        apply_snapshot(self.store, snapshot, now_ms).map_err(|e| e.in_phase(PHASE_APPLY))?;
        self.store
            .set_last_modified(snapshot.timestamp)
            .map_err(|e| e.in_phase(PHASE_APPLY))?;
        record_last_sync(self.config, now_ms)?;
        tracing::info!(timestamp = snapshot.timestamp, "snapshot applied");
        Ok(())
    }

    /// Sends the whole local state as the root snapshot. Nothing goes over the
    /// network when a collection is missing.
    pub fn upload(&self, now_ms: i64) -> AppResult<UploadResultV1> {
        let result = self
            .store
            .begin_sync()
            .and_then(|_guard| self.upload_snapshot(now_ms));
        self.finish("upload", result, |r| {
            NotificationV1::success("upload", format!("uploaded snapshot to {}", r.target))
        })
    }

    /// Backup, then fetch and apply, then image reconciliation, in that order.
    pub fn download(&self, now_ms: i64) -> AppResult<DownloadResultV1> {
        let result = self
            .store
            .begin_sync()
            .and_then(|_guard| self.download_locked(now_ms));
        self.finish("download", result, |r| match (r.status, &r.image_sync_error) {
            (RestoreStatus::NothingToRestore, _) => {
                NotificationV1::info("download", "remote has no snapshot; nothing to restore")
            }
            (RestoreStatus::Restored, Some(err)) => NotificationV1::partial(
                "download",
                format!("data restored but image sync failed: {}", err.message),
                1,
            ),
            (RestoreStatus::Restored, None) => {
                let failed = r.images.as_ref().map_or(0, |i| i.errors.len());
                if failed > 0 {
                    NotificationV1::partial(
                        "download",
                        format!("data restored; {} image transfers failed", failed),
                        failed,
                    )
                } else {
                    NotificationV1::success("download", "data restored from remote")
                }
            }
        })
    }

    fn download_locked(&self, now_ms: i64) -> AppResult<DownloadResultV1> {
        let backend = self.remote()?;
        let local = produce_snapshot(self.store, now_ms).map_err(|e| e.in_phase(PHASE_BACKUP))?;
        let backup = match create_backup(backend, &local, LABEL_LOCAL_BACKUP, now_ms) {
            Ok(record) => Some(record),
            Err(err) => {
                let err = err.in_phase(PHASE_BACKUP);
                if !self.confirm.confirm(
                    "Backing up local data failed. Restore anyway without a backup?",
                    &err,
                ) {
                    return Err(AppError::new(
                        "LT_SYNC_CANCELLED",
                        "sync",
                        "restore cancelled because the local backup failed",
                        false,
                        serde_json::json!({
                            "phase": PHASE_BACKUP,
                            "cause": err.code,
                            "cause_message": err.message
                        }),
                    ));
                }
                tracing::warn!(code = %err.code, "restoring without a local backup");
                None
            }
        };
        let proceeded_without_backup = backup.is_none();

        let Some(remote) = self.fetch_remote_snapshot()? else {
            return Ok(DownloadResultV1 {
                status: RestoreStatus::NothingToRestore,
                backup,
                proceeded_without_backup,
                snapshot_timestamp: None,
                restored_counts: BTreeMap::new(),
                images: None,
                image_sync_error: None,
            });
        };

        self.restore(&remote, now_ms)?;

        let (images, image_sync_error) =
            match reconcile_after_restore(self.store, self.images, backend, &remote.logs, now_ms) {
                Ok(images) => (Some(images), None),
                Err(err) => (None, Some(err.in_phase(PHASE_IMAGE_SYNC))),
            };

        Ok(DownloadResultV1 {
            status: RestoreStatus::Restored,
            backup,
            proceeded_without_backup,
            snapshot_timestamp: Some(remote.timestamp),
            restored_counts: restored_counts(&remote),
            images,
            image_sync_error,
        })
    }

    pub fn cleanup_old_backups(&self) -> AppResult<BackupCleanupReportV1> {
        let result = self
            .remote()
            .and_then(cleanup_old_backups)
            .map_err(|e| e.in_phase(PHASE_CLEANUP));
        self.finish("backup cleanup", result, |r| {
            if r.nothing_to_clean {
                NotificationV1::info("backup cleanup", "backups already clean")
            } else if let Some(err) = &r.partial_failure {
                NotificationV1::partial("backup cleanup", err.message.clone(), r.failed)
            } else {
                NotificationV1::success(
                    "backup cleanup",
                    format!("deleted {} old backups", r.deleted),
                )
            }
        })
    }

    /// Moves data in whichever direction the timestamps call for, then
    /// reconciles images and the remote image list.
    pub fn quick_sync(&self, mode: QuickSyncMode, now_ms: i64) -> AppResult<QuickSyncResultV1> {
        let result = self
            .store
            .begin_sync()
            .and_then(|_guard| self.quick_sync_locked(mode, now_ms));
        self.finish("quick sync", result, |r| {
            let data = match r.direction {
                SyncDirection::Restore => "restored remote data",
                SyncDirection::Upload => "uploaded local data",
                SyncDirection::InSync => "data already in sync",
            };
            let images = r.images.clone().unwrap_or_default();
            let summary = format!(
                "{}; {} images uploaded, {} downloaded",
                data, images.uploaded, images.downloaded
            );
            match &r.image_sync_error {
                Some(err) => NotificationV1::partial(
                    "quick sync",
                    format!("{}; image sync failed: {}", data, err.message),
                    1,
                ),
                None if !images.errors.is_empty() => {
                    NotificationV1::partial("quick sync", summary, images.errors.len())
                }
                None => NotificationV1::success("quick sync", summary),
            }
        })
    }

    fn quick_sync_locked(&self, mode: QuickSyncMode, now_ms: i64) -> AppResult<QuickSyncResultV1> {
        let local_timestamp = self.store.last_modified_ms();
        let remote = self.fetch_remote_snapshot()?;
        let remote_timestamp = remote.as_ref().map(|s| s.timestamp);
        let direction = decide_sync_direction(local_timestamp, remote_timestamp.unwrap_or(0));
        tracing::info!(?mode, ?direction, local_timestamp, ?remote_timestamp, "quick sync");

        let mut backup = None;
        let mut upload = None;
        match (direction, &remote) {
            (SyncDirection::Restore, Some(remote)) => {
                let local =
                    produce_snapshot(self.store, now_ms).map_err(|e| e.in_phase(PHASE_BACKUP))?;
                backup = Some(
                    create_backup(self.remote()?, &local, mode.backup_label(), now_ms)
                        .map_err(|e| e.in_phase(PHASE_BACKUP))?,
                );
                self.restore(remote, now_ms)?;
            }
            (SyncDirection::Upload, _) => {
                upload = Some(self.upload_snapshot(now_ms)?);
            }
            _ => {}
        }

        let (images, image_list_uploaded, image_sync_error) =
            match self.sync_image_lists(upload.is_some(), now_ms) {
                Ok((images, uploaded)) => (Some(images), uploaded, None),
                Err(err) => (None, false, Some(err.in_phase(PHASE_IMAGE_SYNC))),
            };

        Ok(QuickSyncResultV1 {
            mode,
            direction,
            local_timestamp,
            remote_timestamp,
            backup,
            upload,
            images,
            image_list_uploaded,
            image_sync_error,
        })
    }

    /// Sweeps tracked deletions, merges the local reference list, the current
    /// records and the remote list document minus those deletions, syncs
    /// blobs, and rewrites the remote document when it no longer matches.
    fn sync_image_lists(
        &self,
        data_uploaded: bool,
        now_ms: i64,
    ) -> AppResult<(ImageSyncResultV1, bool)> {
        let backend = self.remote()?;
        let records = self.store.collection(Collection::Logs)?.unwrap_or_default();
        let sweep = sweep_deleted_images(self.store, self.images, backend, &records, now_ms)?;

        let mut merged: BTreeSet<String> = self.store.referenced_images()?.into_iter().collect();
        merged.extend(compute_referenced_set(&records));
        let cloud: BTreeSet<String> = match download_image_list(backend) {
            Ok(doc) => doc.map(|d| d.images.into_iter().collect()).unwrap_or_default(),
            Err(err) => {
                tracing::warn!(code = %err.code, "remote image list unreadable, treating as empty");
                BTreeSet::new()
            }
        };
        merged.extend(cloud.iter().cloned());
        merged.retain(|id| !sweep.removed.contains(id));
        let merged_list: Vec<String> = merged.iter().cloned().collect();
        self.store.set_referenced_images(&merged_list, now_ms)?;

        let mut images = sync_referenced_images(self.images, backend, &merged)?;
        images.deleted_remote = sweep.outcome.succeeded_count();
        images.errors.extend(sweep.outcome.failed.iter().cloned());

        let cloud_outdated = merged != cloud;
        let mut list_uploaded = false;
        if data_uploaded || cloud_outdated || images.uploaded > 0 {
            match upload_image_list(backend, &merged_list, now_ms) {
                Ok(_) => list_uploaded = true,
                Err(err) => tracing::warn!(code = %err.code, "image list upload failed"),
            }
        }

        // A tombstone is settled once its blob is gone and the remote list no
        // longer names it; failed ones are retried on the next sync.
        let settled: BTreeSet<String> = sweep.outcome.succeeded.iter().cloned().collect();
        if !settled.is_empty() && (list_uploaded || cloud.is_disjoint(&settled)) {
            self.store.clear_deleted_images(&settled, now_ms)?;
        }
        Ok((images, list_uploaded))
    }

    /// Referenced images only: uploads what is missing remotely and fetches
    /// what is missing on device.
    pub fn sync_images(&self, now_ms: i64) -> AppResult<ImageSyncResultV1> {
        let result = self
            .store
            .begin_sync()
            .and_then(|_guard| self.sync_image_lists(false, now_ms).map(|(r, _)| r))
            .map_err(|e| {
                if e.phase().is_some() {
                    e
                } else {
                    e.in_phase(PHASE_IMAGE_SYNC)
                }
            });
        self.finish("image sync", result, |r| {
            let mut summary =
                format!("{} images uploaded, {} downloaded", r.uploaded, r.downloaded);
            if r.deleted_remote > 0 {
                summary.push_str(&format!(", {} deletions pushed", r.deleted_remote));
            }
            if r.errors.is_empty() {
                NotificationV1::success("image sync", summary)
            } else {
                NotificationV1::partial("image sync", summary, r.errors.len())
            }
        })
    }

    /// Local-only unless `include_remote`, which needs a connected endpoint.
    pub fn image_cleanup_report(&self, include_remote: bool) -> AppResult<ImageCleanupReportV1> {
        let result = self.logs().and_then(|logs| {
            let remote = if include_remote {
                Some(self.remote()?)
            } else {
                None
            };
            generate_cleanup_report(&logs, self.images, remote)
        });
        self.finish("image report", result, |r| {
            NotificationV1::info(
                "image report",
                format!("{} unreferenced local images", r.local_orphans.len()),
            )
        })
    }

    /// Refuses to run when logs were never loaded, since every blob would look
    /// unreferenced. Deleted ids are tombstoned so the next sync drops them
    /// from the remote list instead of fetching them back.
    pub fn cleanup_unreferenced_images(
        &self,
        options: CleanupOptions,
        now_ms: i64,
    ) -> AppResult<ImageCleanupResultV1> {
        let result = self
            .logs()
            .and_then(|logs| {
                let mut result =
                    cleanup_unreferenced_images(&logs, self.images, self.backend, options)?;
                record_image_deletions(self.store, &logs, &mut result, now_ms)?;
                Ok(result)
            })
            .map_err(|e| e.in_phase(PHASE_CLEANUP));
        self.finish("image cleanup", result, |r| match &r.partial_failure {
            Some(err) => {
                NotificationV1::partial("image cleanup", err.message.clone(), r.failed_count())
            }
            None => NotificationV1::success(
                "image cleanup",
                format!("deleted {} images", r.deleted_count()),
            ),
        })
    }

    pub fn sync_status(&self) -> AppResult<SyncStatusV1> {
        let target = self.remote()?.target().display();
        let remote_timestamp = self.fetch_remote_snapshot()?.map(|s| s.timestamp);
        let local_last_modified_ms = self.store.last_modified_ms();
        Ok(SyncStatusV1 {
            target,
            remote_timestamp,
            local_last_modified_ms,
            last_sync_ms: last_sync_ms(self.config)?,
            last_check_ms: last_check_ms(self.config)?,
            direction: decide_sync_direction(local_last_modified_ms, remote_timestamp.unwrap_or(0)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_follows_strictly_newer_side() {
        assert_eq!(decide_sync_direction(10, 20), SyncDirection::Restore);
        assert_eq!(decide_sync_direction(20, 10), SyncDirection::Upload);
        assert_eq!(decide_sync_direction(15, 15), SyncDirection::InSync);
        assert_eq!(decide_sync_direction(0, 0), SyncDirection::InSync);
    }
}
