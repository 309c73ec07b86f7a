use crate::commands::workspace::{StderrNotifier, Workspace};
use lt_core::app_error::{AppError, AppResult};
use lt_core::images::{
    rebuild_referenced_list_from_records, CleanupOptions, ImageCleanupReportV1,
    ImageCleanupResultV1, ImageSyncResultV1,
};
use lt_core::local_store::Collection;
use lt_core::sync::SyncOrchestrator;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct ImageRebuildV1 {
    pub referenced: Vec<String>,
}

fn logs(ws: &Workspace) -> AppResult<Vec<Value>> {
    ws.store.collection(Collection::Logs)?.ok_or_else(|| {
        AppError::new(
            "LT_LOCAL_STATE_INVALID",
            "local_store",
            "logs are not initialized; run `store init` or restore first",
            false,
            serde_json::json!({ "missing": [Collection::Logs.key()] }),
        )
    })
}

/// Resolves an endpoint only when the operation touches the remote.
fn with_orchestrator<T>(
    ws: &Workspace,
    target: Option<&str>,
    needs_remote: bool,
    run: impl FnOnce(SyncOrchestrator<'_>) -> AppResult<T>,
) -> AppResult<T> {
    if !needs_remote {
        let local = SyncOrchestrator::local(&ws.store, &ws.images, &ws.config);
        return run(local.with_notifier(&StderrNotifier));
    }
    let backend = ws.backend(target)?;
    run(SyncOrchestrator::new(&ws.store, &ws.images, backend.as_ref(), &ws.config)
        .with_notifier(&StderrNotifier))
}

pub fn run_report(
    ws: &Workspace,
    target: Option<&str>,
    include_remote: bool,
) -> AppResult<ImageCleanupReportV1> {
    with_orchestrator(ws, target, include_remote, |o| {
        o.image_cleanup_report(include_remote)
    })
}

pub fn run_cleanup(
    ws: &Workspace,
    target: Option<&str>,
    options: CleanupOptions,
    now_ms: i64,
) -> AppResult<ImageCleanupResultV1> {
    with_orchestrator(ws, target, options.delete_remote, |o| {
        o.cleanup_unreferenced_images(options, now_ms)
    })
}

pub fn run_rebuild(ws: &Workspace, now_ms: i64) -> AppResult<ImageRebuildV1> {
    let referenced = rebuild_referenced_list_from_records(&ws.store, &logs(ws)?, now_ms)?;
    Ok(ImageRebuildV1 { referenced })
}

pub fn run_sync(ws: &Workspace, target: Option<&str>, now_ms: i64) -> AppResult<ImageSyncResultV1> {
    with_orchestrator(ws, target, true, |o| o.sync_images(now_ms))
}
