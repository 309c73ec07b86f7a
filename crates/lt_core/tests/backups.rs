mod common;

use common::{now_secs, set_mtime, FaultyBackend, Fixture};
use lt_core::backup::{cleanup_old_backups, create_backup, list_backups, LABEL_LOCAL_BACKUP};
use lt_core::local_store::LocalState;
use lt_core::notify::NotifyLevel;
use lt_core::remote::{RemoteObjectBackend, JSON_CONTENT_TYPE};
use lt_core::snapshot::Snapshot;

fn plant(fx: &Fixture, name: &str, epoch_secs: u64) {
    fx.remote
        .upload_blob(name, b"{}", JSON_CONTENT_TYPE)
        .expect("plant backup");
    set_mtime(&fx.remote_path(name), epoch_secs);
}

#[test]
fn cleanup_on_empty_backups_dir_is_nothing_to_clean() {
    let fx = Fixture::new();
    let backend = FaultyBackend::new(&fx.remote);
    let report = cleanup_old_backups(&backend).expect("cleanup");
    assert!(report.nothing_to_clean);
    assert_eq!(report.deleted, 0);
    assert_eq!(report.kept, None);

    let report = fx.orchestrator(&backend).cleanup_old_backups().expect("cleanup");
    assert!(report.nothing_to_clean);
    let notes = fx.notifier.take();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].level, NotifyLevel::Info);
}

#[test]
fn cleanup_keeps_newest_by_mtime_not_by_name() {
    let fx = Fixture::new();
    let base = now_secs() - 10_000;
    plant(&fx, "backups/local_backup_2030-01-01T00-00-00-000Z.json", base);
    plant(&fx, "backups/local_backup_2020-01-01T00-00-00-000Z.json", base + 500);
    plant(&fx, "backups/pre_restore_2025-01-01T00-00-00-000Z.json", base + 100);
    plant(&fx, "backups/notes.txt", base + 900);
    std::fs::create_dir_all(fx.remote_path("backups/archive.json")).expect("dir");

    let report = cleanup_old_backups(&fx.remote).expect("cleanup");
    assert_eq!(
        report.kept.as_deref(),
        Some("backups/local_backup_2020-01-01T00-00-00-000Z.json")
    );
    assert_eq!(report.deleted, 2);
    assert_eq!(report.failed, 0);
    assert!(fx.remote_path("backups/notes.txt").exists());
    assert!(fx.remote_path("backups/archive.json").is_dir());
}

#[test]
fn cleanup_twice_keeps_same_file_and_deletes_nothing_second_time() {
    let fx = Fixture::new();
    let snapshot = Snapshot::from_state(&LocalState::empty(), 1).expect("snapshot");
    let first = create_backup(&fx.remote, &snapshot, LABEL_LOCAL_BACKUP, 1_000).expect("b1");
    let second = create_backup(&fx.remote, &snapshot, LABEL_LOCAL_BACKUP, 2_000).expect("b2");
    let base = now_secs() - 100;
    set_mtime(&fx.remote_path(&first.name), base);
    set_mtime(&fx.remote_path(&second.name), base + 50);

    let once = cleanup_old_backups(&fx.remote).expect("first cleanup");
    let twice = cleanup_old_backups(&fx.remote).expect("second cleanup");
    assert_eq!(once.kept.as_deref(), Some(second.name.as_str()));
    assert_eq!(once.deleted, 1);
    assert_eq!(twice.kept, once.kept);
    assert_eq!(twice.deleted, 0);
    assert!(twice.nothing_to_clean);
}

#[test]
fn delete_failures_do_not_stop_other_deletions() {
    let fx = Fixture::new();
    let base = now_secs() - 1_000;
    plant(&fx, "backups/a.json", base);
    plant(&fx, "backups/b.json", base + 1);
    plant(&fx, "backups/c.json", base + 2);
    plant(&fx, "backups/d.json", base + 3);

    let mut backend = FaultyBackend::new(&fx.remote);
    backend.fail_delete = vec!["backups/b.json".to_string()];

    let report = fx.orchestrator(&backend).cleanup_old_backups().expect("cleanup");
    assert_eq!(report.kept.as_deref(), Some("backups/d.json"));
    assert_eq!(report.deleted, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.outcome.failed[0].item, "backups/b.json");
    assert!(!fx.remote_path("backups/a.json").exists());
    assert!(fx.remote_path("backups/b.json").exists());
    assert!(!fx.remote_path("backups/c.json").exists());

    let partial = report.partial_failure.as_ref().expect("partial");
    assert_eq!(partial.code, "LT_CLEANUP_PARTIAL");
    assert_eq!(partial.details["items"], serde_json::json!(["backups/b.json"]));

    let notes = fx.notifier.take();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].level, NotifyLevel::Warning);
    assert_eq!(notes[0].failed_count, Some(1));
    assert_eq!(notes[0].message, partial.message);
    assert_eq!(list_backups(&fx.remote).expect("list").len(), 2);
}
