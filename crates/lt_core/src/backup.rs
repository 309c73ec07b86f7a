use crate::app_error::{AppError, AppResult};
use crate::batch::{attempt_all, BatchOutcomeV1};
use crate::remote::{RemoteEntry, RemoteObjectBackend, BACKUPS_DIR, JSON_CONTENT_TYPE};
use crate::snapshot::{encode_snapshot, snapshot_fingerprint, Snapshot};
use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Serialize};

pub const BACKUP_EXTENSION: &str = ".json";
pub const LABEL_LOCAL_BACKUP: &str = "local_backup";
pub const LABEL_PRE_RESTORE: &str = "pre_restore";
pub const LABEL_STARTUP_BACKUP: &str = "startup_backup";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupRecordV1 {
    pub name: String,
    pub fingerprint: String,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupCleanupReportV1 {
    pub kept: Option<String>,
    pub deleted: usize,
    pub failed: usize,
    pub nothing_to_clean: bool,
    pub outcome: BatchOutcomeV1,
    pub partial_failure: Option<AppError>,
}

/// `2026-01-02T03:04:05.678Z` becomes `2026-01-02T03-04-05-678Z`.
pub fn backup_stamp(now_ms: i64) -> String {
    match DateTime::from_timestamp_millis(now_ms) {
        Some(dt) => dt
            .to_rfc3339_opts(SecondsFormat::Millis, true)
            .replace([':', '.'], "-"),
        None => now_ms.to_string(),
    }
}

pub fn backup_name(label: &str, now_ms: i64) -> String {
    format!(
        "{}/{}_{}{}",
        BACKUPS_DIR,
        label,
        backup_stamp(now_ms),
        BACKUP_EXTENSION
    )
}

pub fn create_backup(
    backend: &dyn RemoteObjectBackend,
    snapshot: &Snapshot,
    label: &str,
    now_ms: i64,
) -> AppResult<BackupRecordV1> {
    let bytes = encode_snapshot(snapshot)?;
    let name = backup_name(label, now_ms);
    backend.upload_blob(&name, &bytes, JSON_CONTENT_TYPE)?;
    tracing::info!(name = %name, size = bytes.len(), "backup uploaded");
    Ok(BackupRecordV1 {
        name,
        fingerprint: snapshot_fingerprint(&bytes),
        created_at_ms: now_ms,
    })
}

/// Backup files under `backups/`, newest first by remote modification time.
pub fn list_backups(backend: &dyn RemoteObjectBackend) -> AppResult<Vec<RemoteEntry>> {
    let mut files: Vec<RemoteEntry> = backend
        .list_directory(BACKUPS_DIR)?
        .into_iter()
        .filter(|e| !e.is_dir && e.file_name.ends_with(BACKUP_EXTENSION))
        .collect();
    files.sort_by(|a, b| {
        b.last_modified_ms
            .cmp(&a.last_modified_ms)
            .then_with(|| b.name.cmp(&a.name))
    });
    Ok(files)
}

/// Keeps the most recently modified backup and deletes every other one,
/// attempting all deletions even when some fail.
pub fn cleanup_old_backups(backend: &dyn RemoteObjectBackend) -> AppResult<BackupCleanupReportV1> {
    let files = list_backups(backend)?;
    if files.len() <= 1 {
        tracing::info!(count = files.len(), "backups already clean");
        return Ok(BackupCleanupReportV1 {
            kept: files.first().map(|e| e.name.clone()),
            deleted: 0,
            failed: 0,
            nothing_to_clean: true,
            outcome: BatchOutcomeV1::default(),
            partial_failure: None,
        });
    }

    let kept = files[0].name.clone();
    let stale = files.into_iter().skip(1).map(|e| e.name);
    let outcome = attempt_all(stale, "backup", |name| backend.delete_blob(name));
    tracing::info!(
        kept = %kept,
        deleted = outcome.succeeded_count(),
        failed = outcome.failed_count(),
        "backup cleanup finished"
    );
    Ok(BackupCleanupReportV1 {
        kept: Some(kept),
        deleted: outcome.succeeded_count(),
        failed: outcome.failed_count(),
        nothing_to_clean: false,
        partial_failure: outcome.partial_failure("backup"),
        outcome,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_names_have_no_colons_or_periods_in_stamp() {
        let name = backup_name(LABEL_LOCAL_BACKUP, 1_767_323_045_678);
        assert_eq!(name, "backups/local_backup_2026-01-02T03-04-05-678Z.json");
        assert_eq!(
            backup_name(LABEL_PRE_RESTORE, 0),
            "backups/pre_restore_1970-01-01T00-00-00-000Z.json"
        );
    }
}
