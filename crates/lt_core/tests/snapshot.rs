mod common;

use common::{log, Fixture};
use lt_core::local_store::{Collection, LocalState};
use lt_core::snapshot::{apply_snapshot, produce_snapshot};

#[test]
fn apply_of_produced_snapshot_is_a_no_op() {
    let fx = Fixture::new();
    let state = LocalState::empty()
        .with(Collection::Logs, vec![log("l1", &["a.jpg"]), log("l2", &[])])
        .with(Collection::Goals, vec![serde_json::json!({ "id": "g", "target": 3.5 })]);
    fx.store.replace_all(state, 10).expect("seed");
    fx.store.set_user_personal_info("likes running", 11).expect("info");
    let before = fx.store.state().expect("state");

    let snapshot = produce_snapshot(&fx.store, 50).expect("produce");
    apply_snapshot(&fx.store, &snapshot, 60).expect("apply");

    assert_eq!(fx.store.state().expect("state"), before);
    assert_eq!(fx.store.last_modified_ms(), 11);
}

#[test]
fn round_trip_keeps_unset_personal_info_unset() {
    let fx = Fixture::new();
    fx.store
        .replace_all(LocalState::empty().with(Collection::Logs, vec![log("l1", &[])]), 10)
        .expect("seed");
    let before = fx.store.state().expect("state");
    assert_eq!(before.user_personal_info, None);

    let snapshot = produce_snapshot(&fx.store, 50).expect("produce");
    assert_eq!(snapshot.user_personal_info, "");
    apply_snapshot(&fx.store, &snapshot, 60).expect("apply");

    assert_eq!(fx.store.state().expect("state"), before);
    let reopened = lt_core::local_store::LocalStore::open(
        &fx.dir.path().join("device/db/local.sqlite"),
    )
    .expect("reopen");
    assert_eq!(reopened.state().expect("state"), before);
}

#[test]
fn apply_survives_reopen() {
    let fx = Fixture::new();
    fx.store
        .replace_all(LocalState::empty().with(Collection::Todos, vec![log("t", &[])]), 1)
        .expect("seed");
    let snapshot = produce_snapshot(&fx.store, 2).expect("produce");

    let other = tempfile::tempdir().expect("tempdir");
    let db = other.path().join("local.sqlite");
    {
        let store = lt_core::local_store::LocalStore::open(&db).expect("open");
        apply_snapshot(&store, &snapshot, 3).expect("apply");
        assert_eq!(store.last_modified_ms(), 0);
    }
    let reopened = lt_core::local_store::LocalStore::open(&db).expect("reopen");
    let state = reopened.state().expect("state");
    assert!(state.missing_collections().is_empty());
    assert_eq!(state.get(Collection::Todos).map(Vec::len), Some(1));
}
