use crate::commands::workspace::{StderrNotifier, TerminalConfirm, Workspace};
use lt_core::app_error::AppResult;
use lt_core::notify::FixedConfirm;
use lt_core::sync::{
    DownloadResultV1, QuickSyncMode, QuickSyncResultV1, SyncOrchestrator, SyncStatusV1,
    UploadResultV1,
};

static ACCEPT: FixedConfirm = FixedConfirm(true);

pub fn run_status(ws: &Workspace, target: Option<&str>) -> AppResult<SyncStatusV1> {
    let backend = ws.backend(target)?;
    SyncOrchestrator::new(&ws.store, &ws.images, backend.as_ref(), &ws.config).sync_status()
}

pub fn run_upload(ws: &Workspace, target: Option<&str>, now_ms: i64) -> AppResult<UploadResultV1> {
    let backend = ws.backend(target)?;
    SyncOrchestrator::new(&ws.store, &ws.images, backend.as_ref(), &ws.config)
        .with_notifier(&StderrNotifier)
        .upload(now_ms)
}

/// `assume_yes` answers the continue-without-backup question up front.
pub fn run_download(
    ws: &Workspace,
    target: Option<&str>,
    assume_yes: bool,
    now_ms: i64,
) -> AppResult<DownloadResultV1> {
    let backend = ws.backend(target)?;
    let orchestrator = SyncOrchestrator::new(&ws.store, &ws.images, backend.as_ref(), &ws.config)
        .with_notifier(&StderrNotifier);
    if assume_yes {
        orchestrator.with_confirm(&ACCEPT).download(now_ms)
    } else {
        orchestrator.with_confirm(&TerminalConfirm).download(now_ms)
    }
}

pub fn run_quick(
    ws: &Workspace,
    target: Option<&str>,
    mode: QuickSyncMode,
    now_ms: i64,
) -> AppResult<QuickSyncResultV1> {
    let backend = ws.backend(target)?;
    SyncOrchestrator::new(&ws.store, &ws.images, backend.as_ref(), &ws.config)
        .with_notifier(&StderrNotifier)
        .quick_sync(mode, now_ms)
}
