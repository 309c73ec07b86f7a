use lt_core::db::{open_db, schema_version};

#[test]
fn migrations_apply_latest_schema() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db_path = temp.path().join("db/local.sqlite");

    let conn = open_db(&db_path).expect("open db");
    assert_eq!(schema_version(&conn).expect("schema version"), 2);

    let names: Vec<String> = ["kv_store", "sync_config"]
        .iter()
        .map(|table| {
            conn.query_row(
                "SELECT name FROM sqlite_master WHERE type='table' AND name=?1",
                [table],
                |row| row.get::<_, String>(0),
            )
            .expect("table must exist")
        })
        .collect();
    assert_eq!(names, vec!["kv_store", "sync_config"]);
}

#[test]
fn reopening_is_idempotent() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db_path = temp.path().join("local.sqlite");
    drop(open_db(&db_path).expect("first open"));
    let conn = open_db(&db_path).expect("second open");
    assert_eq!(schema_version(&conn).expect("schema version"), 2);
}
