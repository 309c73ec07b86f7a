use crate::app_error::{AppError, AppResult};
use crate::db::open_db;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock};

const KEY_USER_PERSONAL_INFO: &str = "userPersonalInfo";
const KEY_LAST_MODIFIED: &str = "lumos_data_last_modified";
const KEY_REFERENCED_IMAGES: &str = "lumos_referenced_images";
const KEY_DELETED_IMAGES: &str = "lumos_deleted_images";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Collection {
    Logs,
    Todos,
    Categories,
    TodoCategories,
    Scopes,
    Goals,
    AutoLinkRules,
    ReviewTemplates,
    DailyReviews,
    WeeklyReviews,
    MonthlyReviews,
    CustomNarrativeTemplates,
    Filters,
}

impl Collection {
    pub const ALL: [Collection; 13] = [
        Collection::Logs,
        Collection::Todos,
        Collection::Categories,
        Collection::TodoCategories,
        Collection::Scopes,
        Collection::Goals,
        Collection::AutoLinkRules,
        Collection::ReviewTemplates,
        Collection::DailyReviews,
        Collection::WeeklyReviews,
        Collection::MonthlyReviews,
        Collection::CustomNarrativeTemplates,
        Collection::Filters,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Collection::Logs => "logs",
            Collection::Todos => "todos",
            Collection::Categories => "categories",
            Collection::TodoCategories => "todoCategories",
            Collection::Scopes => "scopes",
            Collection::Goals => "goals",
            Collection::AutoLinkRules => "autoLinkRules",
            Collection::ReviewTemplates => "reviewTemplates",
            Collection::DailyReviews => "dailyReviews",
            Collection::WeeklyReviews => "weeklyReviews",
            Collection::MonthlyReviews => "monthlyReviews",
            Collection::CustomNarrativeTemplates => "customNarrativeTemplates",
            Collection::Filters => "filters",
        }
    }

    pub fn from_key(key: &str) -> Option<Collection> {
        Collection::ALL.into_iter().find(|c| c.key() == key)
    }
}

/// Synchronizable application state. A collection missing from the map has
/// never been initialized, which is different from an empty collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalState {
    pub collections: BTreeMap<Collection, Vec<Value>>,
    pub user_personal_info: Option<String>,
}

impl LocalState {
    pub fn empty() -> Self {
        Self {
            collections: Collection::ALL
                .into_iter()
                .map(|c| (c, Vec::new()))
                .collect(),
            user_personal_info: None,
        }
    }

    pub fn with(mut self, collection: Collection, items: Vec<Value>) -> Self {
        self.collections.insert(collection, items);
        self
    }

    pub fn get(&self, collection: Collection) -> Option<&Vec<Value>> {
        self.collections.get(&collection)
    }

    pub fn missing_collections(&self) -> Vec<Collection> {
        Collection::ALL
            .into_iter()
            .filter(|c| !self.collections.contains_key(c))
            .collect()
    }
}

pub struct LocalStore {
    conn: Mutex<Connection>,
    state: RwLock<LocalState>,
    last_modified_ms: AtomicI64,
    skip_next_timestamp: AtomicBool,
    sync_in_flight: AtomicBool,
}

pub struct SyncGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

fn store_error(code: &str, message: &str, details: Value) -> AppError {
    AppError::new(code, "local_store", message, false, details)
}

fn poisoned() -> AppError {
    store_error(
        "LT_STORE_LOCK_POISONED",
        "local store lock poisoned",
        serde_json::json!({}),
    )
}

fn read_value(conn: &Connection, key: &str) -> AppResult<Option<String>> {
    conn.query_row(
        "SELECT store_value FROM kv_store WHERE store_key=?1",
        [key],
        |row| row.get(0),
    )
    .optional()
    .map_err(|e| {
        store_error(
            "LT_STORE_READ_FAILED",
            "failed reading local store key",
            serde_json::json!({ "error": e.to_string(), "key": key }),
        )
    })
}

fn write_value(conn: &Connection, key: &str, value: &str, now_ms: i64) -> AppResult<()> {
    conn.execute(
        "INSERT INTO kv_store(store_key, store_value, updated_at_ms)
         VALUES(?1, ?2, ?3)
         ON CONFLICT(store_key) DO UPDATE SET store_value=excluded.store_value, updated_at_ms=excluded.updated_at_ms",
        params![key, value, now_ms],
    )
    .map_err(|e| {
        store_error(
            "LT_STORE_WRITE_FAILED",
            "failed writing local store key",
            serde_json::json!({ "error": e.to_string(), "key": key }),
        )
    })?;
    Ok(())
}

fn encode<T: Serialize>(value: &T, key: &str) -> AppResult<String> {
    serde_json::to_string(value).map_err(|e| {
        store_error(
            "LT_STORE_WRITE_FAILED",
            "failed encoding local store value",
            serde_json::json!({ "error": e.to_string(), "key": key }),
        )
    })
}

fn delete_value(conn: &Connection, key: &str) -> AppResult<()> {
    conn.execute("DELETE FROM kv_store WHERE store_key=?1", [key])
        .map(|_| ())
        .map_err(|e| {
            store_error(
                "LT_STORE_WRITE_FAILED",
                "failed clearing local store key",
                serde_json::json!({ "error": e.to_string(), "key": key }),
            )
        })
}

/// An empty personal info string and an absent one are the same state.
fn non_empty(info: Option<String>) -> Option<String> {
    info.filter(|s| !s.is_empty())
}

fn decode<T: for<'de> Deserialize<'de>>(raw: &str, key: &str) -> AppResult<T> {
    serde_json::from_str(raw).map_err(|e| {
        store_error(
            "LT_STORE_CORRUPT",
            "failed decoding local store value",
            serde_json::json!({ "error": e.to_string(), "key": key }),
        )
    })
}

fn load_state(conn: &Connection) -> AppResult<LocalState> {
    let mut state = LocalState::default();
    for collection in Collection::ALL {
        if let Some(raw) = read_value(conn, collection.key())? {
            let items: Vec<Value> = decode(&raw, collection.key())?;
            state.collections.insert(collection, items);
        }
    }
    state.user_personal_info = non_empty(
        read_value(conn, KEY_USER_PERSONAL_INFO)?
            .map(|raw| decode::<String>(&raw, KEY_USER_PERSONAL_INFO))
            .transpose()?,
    );
    Ok(state)
}

impl LocalStore {
    pub fn open(db_path: &Path) -> AppResult<Self> {
        let conn = open_db(db_path)?;
        let state = load_state(&conn)?;
        let last_modified_ms = read_value(&conn, KEY_LAST_MODIFIED)?
            .map(|raw| decode::<i64>(&raw, KEY_LAST_MODIFIED))
            .transpose()?
            .unwrap_or(0);
        tracing::debug!(
            path = %db_path.display(),
            missing = state.missing_collections().len(),
            "opened local store"
        );
        Ok(Self {
            conn: Mutex::new(conn),
            state: RwLock::new(state),
            last_modified_ms: AtomicI64::new(last_modified_ms),
            skip_next_timestamp: AtomicBool::new(false),
            sync_in_flight: AtomicBool::new(false),
        })
    }

    fn conn(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| poisoned())
    }

    pub fn state(&self) -> AppResult<LocalState> {
        Ok(self.state.read().map_err(|_| poisoned())?.clone())
    }

    pub fn collection(&self, collection: Collection) -> AppResult<Option<Vec<Value>>> {
        Ok(self
            .state
            .read()
            .map_err(|_| poisoned())?
            .get(collection)
            .cloned())
    }

    pub fn set_collection(
        &self,
        collection: Collection,
        items: Vec<Value>,
        now_ms: i64,
    ) -> AppResult<()> {
        {
            let conn = self.conn()?;
            write_value(&conn, collection.key(), &encode(&items, collection.key())?, now_ms)?;
        }
        self.state
            .write()
            .map_err(|_| poisoned())?
            .collections
            .insert(collection, items);
        self.touch(now_ms)
    }

    pub fn set_user_personal_info(&self, info: &str, now_ms: i64) -> AppResult<()> {
        let info = non_empty(Some(info.to_string()));
        {
            let conn = self.conn()?;
            match &info {
                Some(value) => write_value(
                    &conn,
                    KEY_USER_PERSONAL_INFO,
                    &encode(value, KEY_USER_PERSONAL_INFO)?,
                    now_ms,
                )?,
                None => delete_value(&conn, KEY_USER_PERSONAL_INFO)?,
            }
        }
        self.state.write().map_err(|_| poisoned())?.user_personal_info = info;
        self.touch(now_ms)
    }

    /// Replaces every synchronizable field in one transaction, then swaps the
    /// in-memory state in one step. On failure nothing is changed.
    pub fn replace_all(&self, mut next: LocalState, now_ms: i64) -> AppResult<()> {
        next.user_personal_info = non_empty(next.user_personal_info);
        {
            let mut conn = self.conn()?;
            let tx = conn.transaction().map_err(|e| {
                store_error(
                    "LT_STORE_WRITE_FAILED",
                    "failed to begin local store transaction",
                    serde_json::json!({ "error": e.to_string() }),
                )
            })?;
            for collection in Collection::ALL {
                match next.get(collection) {
                    Some(items) => write_value(
                        &tx,
                        collection.key(),
                        &encode(items, collection.key())?,
                        now_ms,
                    )?,
                    None => delete_value(&tx, collection.key())?,
                }
            }
            match &next.user_personal_info {
                Some(info) => write_value(
                    &tx,
                    KEY_USER_PERSONAL_INFO,
                    &encode(info, KEY_USER_PERSONAL_INFO)?,
                    now_ms,
                )?,
                None => delete_value(&tx, KEY_USER_PERSONAL_INFO)?,
            }
            tx.commit().map_err(|e| {
                store_error(
                    "LT_STORE_WRITE_FAILED",
                    "failed to commit local store transaction",
                    serde_json::json!({ "error": e.to_string() }),
                )
            })?;
        }
        *self.state.write().map_err(|_| poisoned())? = next;
        self.touch(now_ms)
    }

    pub fn last_modified_ms(&self) -> i64 {
        self.last_modified_ms.load(Ordering::SeqCst)
    }

    pub fn set_last_modified(&self, value_ms: i64) -> AppResult<()> {
        let conn = self.conn()?;
        write_value(&conn, KEY_LAST_MODIFIED, &value_ms.to_string(), value_ms)?;
        self.last_modified_ms.store(value_ms, Ordering::SeqCst);
        Ok(())
    }

    /// The next mutation will not advance the last-modified timestamp.
    pub fn skip_next_timestamp_update(&self) {
        self.skip_next_timestamp.store(true, Ordering::SeqCst);
    }

    pub fn clear_skip_timestamp_update(&self) {
        self.skip_next_timestamp.store(false, Ordering::SeqCst);
    }

    fn touch(&self, now_ms: i64) -> AppResult<()> {
        if self.skip_next_timestamp.swap(false, Ordering::SeqCst) {
            tracing::debug!("skipped last-modified update for restored data");
            return Ok(());
        }
        self.set_last_modified(now_ms)
    }

    pub fn referenced_images(&self) -> AppResult<Vec<String>> {
        let conn = self.conn()?;
        match read_value(&conn, KEY_REFERENCED_IMAGES)? {
            Some(raw) => decode(&raw, KEY_REFERENCED_IMAGES),
            None => Ok(Vec::new()),
        }
    }

    pub fn set_referenced_images(&self, images: &[String], now_ms: i64) -> AppResult<()> {
        let conn = self.conn()?;
        write_value(
            &conn,
            KEY_REFERENCED_IMAGES,
            &encode(&images, KEY_REFERENCED_IMAGES)?,
            now_ms,
        )
    }

    /// Media ids deleted on this device whose removal has not yet reached the
    /// remote image list.
    pub fn deleted_images(&self) -> AppResult<BTreeSet<String>> {
        let conn = self.conn()?;
        match read_value(&conn, KEY_DELETED_IMAGES)? {
            Some(raw) => decode(&raw, KEY_DELETED_IMAGES),
            None => Ok(BTreeSet::new()),
        }
    }

    pub fn track_deleted_images(&self, ids: &[String], now_ms: i64) -> AppResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut deleted = self.deleted_images()?;
        deleted.extend(ids.iter().cloned());
        let conn = self.conn()?;
        write_value(&conn, KEY_DELETED_IMAGES, &encode(&deleted, KEY_DELETED_IMAGES)?, now_ms)
    }

    /// Drops only the given tombstones; ids tracked meanwhile survive.
    pub fn clear_deleted_images(&self, ids: &BTreeSet<String>, now_ms: i64) -> AppResult<()> {
        let mut deleted = self.deleted_images()?;
        let before = deleted.len();
        deleted.retain(|id| !ids.contains(id));
        if deleted.len() == before {
            return Ok(());
        }
        let conn = self.conn()?;
        if deleted.is_empty() {
            delete_value(&conn, KEY_DELETED_IMAGES)
        } else {
            write_value(&conn, KEY_DELETED_IMAGES, &encode(&deleted, KEY_DELETED_IMAGES)?, now_ms)
        }
    }

    pub fn begin_sync(&self) -> AppResult<SyncGuard<'_>> {
        if self
            .sync_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AppError::new(
                "LT_SYNC_IN_PROGRESS",
                "sync",
                "another sync operation is already running",
                true,
                serde_json::json!({}),
            ));
        }
        Ok(SyncGuard {
            flag: &self.sync_in_flight,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_collection_advances_timestamp_unless_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalStore::open(&dir.path().join("db/local.sqlite")).expect("open");
        assert_eq!(store.last_modified_ms(), 0);

        store
            .set_collection(Collection::Logs, vec![json!({ "id": "a" })], 100)
            .expect("set logs");
        assert_eq!(store.last_modified_ms(), 100);

        store.skip_next_timestamp_update();
        store
            .set_collection(Collection::Todos, vec![], 200)
            .expect("set todos");
        assert_eq!(store.last_modified_ms(), 100);

        store
            .set_collection(Collection::Todos, vec![json!({ "id": "t" })], 300)
            .expect("set todos again");
        assert_eq!(store.last_modified_ms(), 300);
    }

    #[test]
    fn state_survives_reopen_and_tracks_missing_collections() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("local.sqlite");
        {
            let store = LocalStore::open(&path).expect("open");
            assert_eq!(store.state().expect("state").missing_collections().len(), 13);
            store
                .set_collection(Collection::Goals, vec![json!({ "id": "g" })], 5)
                .expect("set goals");
            store.set_user_personal_info("runner", 6).expect("info");
        }
        let store = LocalStore::open(&path).expect("reopen");
        let state = store.state().expect("state");
        assert_eq!(state.get(Collection::Goals).map(Vec::len), Some(1));
        assert_eq!(state.user_personal_info.as_deref(), Some("runner"));
        assert!(!state.missing_collections().contains(&Collection::Goals));
        assert!(state.missing_collections().contains(&Collection::Logs));
        assert_eq!(store.last_modified_ms(), 6);
    }

    #[test]
    fn empty_personal_info_is_stored_as_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("local.sqlite");
        {
            let store = LocalStore::open(&path).expect("open");
            store.set_user_personal_info("runner", 1).expect("info");
            store.set_user_personal_info("", 2).expect("clear info");
            assert_eq!(store.state().expect("state").user_personal_info, None);
        }
        let store = LocalStore::open(&path).expect("reopen");
        assert_eq!(store.state().expect("state").user_personal_info, None);
        let conn = store.conn().expect("conn");
        assert_eq!(read_value(&conn, KEY_USER_PERSONAL_INFO).expect("read"), None);
    }

    #[test]
    fn deleted_image_tombstones_clear_selectively() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalStore::open(&dir.path().join("local.sqlite")).expect("open");
        assert!(store.deleted_images().expect("empty").is_empty());

        store
            .track_deleted_images(&["a.jpg".to_string(), "thumb_a.jpg".to_string()], 1)
            .expect("track");
        store.track_deleted_images(&["b.jpg".to_string()], 2).expect("track more");
        let applied: BTreeSet<String> =
            ["a.jpg", "thumb_a.jpg"].iter().map(|s| s.to_string()).collect();
        store.clear_deleted_images(&applied, 3).expect("clear");
        assert_eq!(
            store.deleted_images().expect("remaining").into_iter().collect::<Vec<_>>(),
            vec!["b.jpg".to_string()]
        );
        assert_eq!(store.last_modified_ms(), 0);

        store
            .clear_deleted_images(&store.deleted_images().expect("all"), 4)
            .expect("clear all");
        let conn = store.conn().expect("conn");
        assert_eq!(read_value(&conn, KEY_DELETED_IMAGES).expect("read"), None);
    }

    #[test]
    fn begin_sync_is_single_flight() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalStore::open(&dir.path().join("local.sqlite")).expect("open");
        let guard = store.begin_sync().expect("first guard");
        let err = store.begin_sync().err().expect("second guard must fail");
        assert_eq!(err.code, "LT_SYNC_IN_PROGRESS");
        drop(guard);
        assert!(store.begin_sync().is_ok());
    }

    #[test]
    fn collection_keys_round_trip() {
        for collection in Collection::ALL {
            assert_eq!(Collection::from_key(collection.key()), Some(collection));
        }
        assert_eq!(Collection::from_key("timestamp"), None);
    }
}
