mod common;

use common::{log, state_with_logs, FaultyBackend, Fixture};
use lt_core::backup::{backup_name, list_backups, LABEL_LOCAL_BACKUP, LABEL_PRE_RESTORE};
use lt_core::local_store::{Collection, LocalState};
use lt_core::notify::NotifyLevel;
use lt_core::remote::{RemoteObjectBackend, JSON_CONTENT_TYPE, ROOT_SNAPSHOT_NAME};
use lt_core::snapshot::{parse_snapshot, produce_snapshot};
use lt_core::sync::{QuickSyncMode, RestoreStatus, SyncDirection};
use lt_core::ErrorKind;

#[test]
fn upload_then_restore_brings_back_three_logs() {
    let fx = Fixture::new();
    fx.store.replace_all(state_with_logs(3), 10).expect("seed");

    let uploaded = fx.orchestrator(&fx.remote).upload(100).expect("upload");
    assert!(fx.remote_path(ROOT_SNAPSHOT_NAME).is_file());
    assert!(uploaded.fingerprint.starts_with("blake3:"));
    assert_eq!(uploaded.timestamp, 100);

    fx.store.replace_all(LocalState::empty(), 200).expect("clear");
    assert_eq!(fx.store.collection(Collection::Logs).expect("logs"), Some(vec![]));

    let restored = fx.orchestrator(&fx.remote).download(300).expect("download");
    assert_eq!(restored.status, RestoreStatus::Restored);
    assert_eq!(restored.restored_counts["logs"], 3);
    let logs = fx.store.collection(Collection::Logs).expect("logs").expect("present");
    assert_eq!(logs.len(), 3);
    assert_eq!(fx.store.last_modified_ms(), 100);

    let notes = fx.notifier.take();
    assert_eq!(notes.len(), 2);
    assert!(notes.iter().all(|n| n.level == NotifyLevel::Success));
}

#[test]
fn missing_collection_aborts_upload_before_any_network_call() {
    let fx = Fixture::new();
    let mut state = state_with_logs(1);
    state.collections.remove(&Collection::Todos);
    fx.store.replace_all(state, 10).expect("seed");

    let backend = FaultyBackend::new(&fx.remote);
    let err = fx.orchestrator(&backend).upload(20).expect_err("must abort");
    assert_eq!(err.kind(), ErrorKind::LocalStateInvalid);
    assert_eq!(err.phase(), Some("upload"));
    assert_eq!(backend.calls(), 0);

    let err = fx.orchestrator(&backend).download(30).expect_err("must abort");
    assert_eq!(err.kind(), ErrorKind::LocalStateInvalid);
    assert_eq!(err.phase(), Some("backup"));
    assert_eq!(backend.calls(), 0);
    assert!(!fx.remote_path(ROOT_SNAPSHOT_NAME).exists());

    let notes = fx.notifier.take();
    assert_eq!(notes.len(), 2);
    assert!(notes.iter().all(|n| n.level == NotifyLevel::Error));
    assert_eq!(notes[1].phase.as_deref(), Some("backup"));
}

#[test]
fn download_backs_up_pre_restore_state_first() {
    let fx = Fixture::new();
    fx.store.replace_all(state_with_logs(1), 10).expect("seed remote side");
    fx.orchestrator(&fx.remote).upload(50).expect("upload");

    let local = LocalState::empty().with(Collection::Todos, vec![log("t1", &[])]);
    fx.store.replace_all(local, 60).expect("local edit");
    let before = produce_snapshot(&fx.store, 1_000).expect("snapshot");

    let result = fx.orchestrator(&fx.remote).download(1_000).expect("download");
    let backup = result.backup.expect("backup record");
    assert_eq!(backup.name, backup_name(LABEL_LOCAL_BACKUP, 1_000));
    assert!(!result.proceeded_without_backup);

    let stored = std::fs::read(fx.remote_path(&backup.name)).expect("backup bytes");
    let stored = parse_snapshot(&stored).expect("backup parses");
    assert!(stored.timestamp >= 1_000);
    assert_eq!(stored.todos, before.todos);
    assert_eq!(stored.logs, before.logs);

    let logs = fx.store.collection(Collection::Logs).expect("logs").expect("present");
    assert_eq!(logs.len(), 1);
}

#[test]
fn backup_failure_declined_cancels_restore_and_keeps_local_data() {
    let fx = Fixture::new();
    fx.store.replace_all(state_with_logs(2), 10).expect("seed");
    fx.orchestrator(&fx.remote).upload(20).expect("upload");
    fx.store.replace_all(state_with_logs(5), 30).expect("local edit");

    let mut backend = FaultyBackend::new(&fx.remote);
    backend.fail_upload_prefix = Some("backups/".to_string());

    let err = fx.orchestrator(&backend).download(40).expect_err("declined");
    assert_eq!(err.code, "LT_SYNC_CANCELLED");
    assert_eq!(err.phase(), Some("backup"));
    let logs = fx.store.collection(Collection::Logs).expect("logs").expect("present");
    assert_eq!(logs.len(), 5);
}

#[test]
fn backup_failure_accepted_restores_without_safety_net() {
    let fx = Fixture::new();
    fx.store.replace_all(state_with_logs(2), 10).expect("seed");
    fx.orchestrator(&fx.remote).upload(20).expect("upload");
    fx.store.replace_all(state_with_logs(5), 30).expect("local edit");

    let mut backend = FaultyBackend::new(&fx.remote);
    backend.fail_upload_prefix = Some("backups/".to_string());

    let result = fx
        .orchestrator(&backend)
        .with_confirm(&fx.accept)
        .download(40)
        .expect("proceeds");
    assert!(result.proceeded_without_backup);
    assert!(result.backup.is_none());
    let logs = fx.store.collection(Collection::Logs).expect("logs").expect("present");
    assert_eq!(logs.len(), 2);
}

#[test]
fn download_with_empty_remote_reports_nothing_to_restore() {
    let fx = Fixture::new();
    fx.store.replace_all(state_with_logs(4), 10).expect("seed");

    let result = fx.orchestrator(&fx.remote).download(20).expect("download");
    assert_eq!(result.status, RestoreStatus::NothingToRestore);
    let logs = fx.store.collection(Collection::Logs).expect("logs").expect("present");
    assert_eq!(logs.len(), 4);

    let notes = fx.notifier.take();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].level, NotifyLevel::Info);
}

#[test]
fn corrupt_remote_snapshot_is_a_fetch_phase_format_error() {
    let fx = Fixture::new();
    fx.store.replace_all(state_with_logs(1), 10).expect("seed");
    fx.remote
        .upload_blob(ROOT_SNAPSHOT_NAME, br#"{"logs": [], "timestamp": 5}"#, JSON_CONTENT_TYPE)
        .expect("plant corrupt snapshot");

    let err = fx.orchestrator(&fx.remote).download(20).expect_err("must reject");
    assert_eq!(err.kind(), ErrorKind::Format);
    assert_eq!(err.kind().user_facing(), ErrorKind::Transport);
    assert_eq!(err.phase(), Some("fetch"));
    let logs = fx.store.collection(Collection::Logs).expect("logs").expect("present");
    assert_eq!(logs.len(), 1);
}

#[test]
fn fetch_failure_leaves_local_state_untouched() {
    let fx = Fixture::new();
    fx.store.replace_all(state_with_logs(2), 10).expect("seed");
    let mut backend = FaultyBackend::new(&fx.remote);
    backend.fail_download = true;

    let err = fx.orchestrator(&backend).download(20).expect_err("fetch fails");
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(err.phase(), Some("fetch"));
    assert_eq!(
        fx.store.state().expect("state"),
        state_with_logs(2)
    );
}

#[test]
fn concurrent_sync_is_rejected() {
    let fx = Fixture::new();
    fx.store.replace_all(state_with_logs(1), 10).expect("seed");
    let _held = fx.store.begin_sync().expect("hold guard");

    let err = fx.orchestrator(&fx.remote).upload(20).expect_err("busy");
    assert_eq!(err.kind(), ErrorKind::Busy);
    assert!(err.retryable);
}

#[test]
fn quick_sync_uploads_when_local_is_newer_then_settles() {
    let fx = Fixture::new();
    fx.store
        .replace_all(
            LocalState::empty().with(Collection::Logs, vec![log("l1", &["a.jpg"])]),
            10,
        )
        .expect("seed");
    fx.images.write("a.jpg", b"jpeg").expect("image");

    let first = fx
        .orchestrator(&fx.remote)
        .quick_sync(QuickSyncMode::Manual, 100)
        .expect("quick sync");
    assert_eq!(first.direction, SyncDirection::Upload);
    assert!(first.upload.is_some());
    assert_eq!(first.images.as_ref().map(|i| i.uploaded), Some(1));
    assert!(first.image_list_uploaded);
    assert!(fx.remote_path("images/a.jpg").is_file());

    let second = fx
        .orchestrator(&fx.remote)
        .quick_sync(QuickSyncMode::Auto, 200)
        .expect("quick sync again");
    assert_eq!(second.direction, SyncDirection::InSync);
    assert!(!second.image_list_uploaded);
    assert_eq!(fx.notifier.take().len(), 2);
}

#[test]
fn quick_sync_restores_newer_remote_with_labelled_backup() {
    let fx = Fixture::new();
    fx.store.replace_all(state_with_logs(3), 10).expect("seed");
    fx.orchestrator(&fx.remote).upload(500).expect("upload");

    fx.store.replace_all(state_with_logs(1), 20).expect("older local");
    fx.store.set_last_modified(20).expect("rewind");

    let result = fx
        .orchestrator(&fx.remote)
        .quick_sync(QuickSyncMode::Resume, 600)
        .expect("quick sync");
    assert_eq!(result.direction, SyncDirection::Restore);
    assert_eq!(
        result.backup.expect("backup").name,
        backup_name(LABEL_PRE_RESTORE, 600)
    );
    let logs = fx.store.collection(Collection::Logs).expect("logs").expect("present");
    assert_eq!(logs.len(), 3);
    assert_eq!(fx.store.last_modified_ms(), 500);
    assert_eq!(list_backups(&fx.remote).expect("list").len(), 1);
}

#[test]
fn quick_sync_restore_aborts_without_prompt_when_backup_fails() {
    let fx = Fixture::new();
    fx.store.replace_all(state_with_logs(3), 10).expect("seed");
    fx.orchestrator(&fx.remote).upload(500).expect("upload");
    fx.store.replace_all(state_with_logs(1), 20).expect("older local");
    fx.store.set_last_modified(20).expect("rewind");

    let mut backend = FaultyBackend::new(&fx.remote);
    backend.fail_upload_prefix = Some("backups/".to_string());
    let err = fx
        .orchestrator(&backend)
        .with_confirm(&fx.accept)
        .quick_sync(QuickSyncMode::Startup, 600)
        .expect_err("backup failure aborts");
    assert_eq!(err.phase(), Some("backup"));
    let logs = fx.store.collection(Collection::Logs).expect("logs").expect("present");
    assert_eq!(logs.len(), 1);
}

#[test]
fn sync_status_reports_direction() {
    let fx = Fixture::new();
    fx.store.replace_all(state_with_logs(1), 10).expect("seed");
    let status = fx.orchestrator(&fx.remote).sync_status().expect("status");
    assert_eq!(status.remote_timestamp, None);
    assert_eq!(status.direction, SyncDirection::Upload);
    assert_eq!(status.last_sync_ms, None);

    fx.orchestrator(&fx.remote).upload(40).expect("upload");
    let status = fx.orchestrator(&fx.remote).sync_status().expect("status");
    assert_eq!(status.remote_timestamp, Some(40));
    assert_eq!(status.direction, SyncDirection::InSync);
    assert_eq!(status.last_sync_ms, Some(40));
}
