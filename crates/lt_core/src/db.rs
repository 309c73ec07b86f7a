use crate::app_error::{AppError, AppResult};
use rusqlite::Connection;
use std::fs;
use std::path::Path;

const LATEST_SCHEMA_VERSION: i64 = 2;

const MIGRATIONS: [(i64, &str, &str); 2] = [
    (1, "0001", include_str!("../migrations/0001_local_state.sql")),
    (2, "0002", include_str!("../migrations/0002_sync_config.sql")),
];

fn migration_error(message: &str, details: serde_json::Value) -> AppError {
    AppError::new("LT_DB_MIGRATION_FAILED", "db", message, false, details)
}

pub fn open_db(db_path: &Path) -> AppResult<Connection> {
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            AppError::new(
                "LT_DB_OPEN_FAILED",
                "db",
                "failed to create database parent directory",
                false,
                serde_json::json!({ "error": e.to_string() }),
            )
        })?;
    }

    let conn = Connection::open(db_path).map_err(|e| {
        AppError::new(
            "LT_DB_OPEN_FAILED",
            "db",
            "failed to open sqlite database",
            false,
            serde_json::json!({ "error": e.to_string(), "path": db_path }),
        )
    })?;

    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| {
            AppError::new(
                "LT_DB_OPEN_FAILED",
                "db",
                "failed to enable foreign_keys pragma",
                false,
                serde_json::json!({ "error": e.to_string() }),
            )
        })?;

    apply_migrations(&conn)?;
    Ok(conn)
}

pub fn apply_migrations(conn: &Connection) -> AppResult<()> {
    let current = schema_version(conn)?;
    if current > LATEST_SCHEMA_VERSION {
        return Err(AppError::new(
            "LT_DB_SCHEMA_INCOMPATIBLE",
            "db",
            "database schema version is newer than supported",
            false,
            serde_json::json!({ "current": current, "latest": LATEST_SCHEMA_VERSION }),
        ));
    }

    for (version, label, sql) in MIGRATIONS {
        if schema_version(conn)? >= version {
            continue;
        }

        let tx = conn.unchecked_transaction().map_err(|e| {
            migration_error(
                "failed to begin migration transaction",
                serde_json::json!({ "error": e.to_string(), "migration": label }),
            )
        })?;

        tx.execute_batch(sql).map_err(|e| {
            migration_error(
                "failed to apply migration",
                serde_json::json!({ "error": e.to_string(), "migration": label }),
            )
        })?;

        tx.pragma_update(None, "user_version", version)
            .map_err(|e| {
                migration_error(
                    "failed to set schema user_version",
                    serde_json::json!({ "error": e.to_string(), "migration": label }),
                )
            })?;

        tx.commit().map_err(|e| {
            migration_error(
                "failed to commit migration transaction",
                serde_json::json!({ "error": e.to_string(), "migration": label }),
            )
        })?;
        tracing::debug!(migration = label, "applied schema migration");
    }

    Ok(())
}

pub fn schema_version(conn: &Connection) -> AppResult<i64> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| {
            AppError::new(
                "LT_DB_SCHEMA_INCOMPATIBLE",
                "db",
                "failed to read schema version",
                false,
                serde_json::json!({ "error": e.to_string() }),
            )
        })
}
