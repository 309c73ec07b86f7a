use crate::commands::workspace::{StderrNotifier, Workspace};
use lt_core::app_error::AppResult;
use lt_core::backup::{list_backups, BackupCleanupReportV1};
use lt_core::sync::SyncOrchestrator;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct BackupEntryV1 {
    pub name: String,
    pub size: u64,
    pub last_modified_ms: i64,
}

#[derive(Debug, Serialize)]
pub struct BackupListV1 {
    pub target: String,
    pub backups: Vec<BackupEntryV1>,
}

/// Newest first.
pub fn run_list(ws: &Workspace, target: Option<&str>) -> AppResult<BackupListV1> {
    let backend = ws.backend(target)?;
    let backups = list_backups(backend.as_ref())?
        .into_iter()
        .map(|e| BackupEntryV1 {
            name: e.name,
            size: e.size,
            last_modified_ms: e.last_modified_ms,
        })
        .collect();
    Ok(BackupListV1 {
        target: backend.target().display(),
        backups,
    })
}

pub fn run_cleanup(ws: &Workspace, target: Option<&str>) -> AppResult<BackupCleanupReportV1> {
    let backend = ws.backend(target)?;
    SyncOrchestrator::new(&ws.store, &ws.images, backend.as_ref(), &ws.config)
        .with_notifier(&StderrNotifier)
        .cleanup_old_backups()
}
