use crate::app_error::{AppError, AppResult};
use crate::db::open_db;
use crate::remote::{ConnectionCheck, RemoteObjectBackend};
use crate::remote_s3::S3Backend;
use crate::remote_webdav::WebDavBackend;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

pub const KEY_LAST_SYNC_MS: &str = "last_sync_ms";
pub const KEY_LAST_CHECK_MS: &str = "last_check_ms";

fn config_error(code: &str, message: &str, details: serde_json::Value) -> AppError {
    AppError::new(code, "config", message, false, details)
}

pub trait SyncConfigStore: Send + Sync {
    fn get(&self, key: &str) -> AppResult<Option<String>>;
    fn set(&self, key: &str, value: &str, now_ms: i64) -> AppResult<()>;
    fn clear(&self, key: &str) -> AppResult<()>;
}

pub struct SqliteSyncConfigStore {
    conn: Mutex<Connection>,
}

impl SqliteSyncConfigStore {
    pub fn open(db_path: &Path) -> AppResult<Self> {
        Ok(Self {
            conn: Mutex::new(open_db(db_path)?),
        })
    }

    fn conn(&self) -> AppResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| {
            config_error(
                "LT_DB_LOCK_POISONED",
                "sync config lock poisoned",
                serde_json::json!({}),
            )
        })
    }
}

impl SyncConfigStore for SqliteSyncConfigStore {
    fn get(&self, key: &str) -> AppResult<Option<String>> {
        self.conn()?
            .query_row(
                "SELECT config_value FROM sync_config WHERE config_key=?1",
                [key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| {
                config_error(
                    "LT_DB_READ_FAILED",
                    "failed reading sync config",
                    serde_json::json!({ "error": e.to_string(), "key": key }),
                )
            })
    }

    fn set(&self, key: &str, value: &str, now_ms: i64) -> AppResult<()> {
        self.conn()?
            .execute(
                "INSERT INTO sync_config(config_key, config_value, updated_at_ms)
                 VALUES(?1, ?2, ?3)
                 ON CONFLICT(config_key) DO UPDATE SET config_value=excluded.config_value, updated_at_ms=excluded.updated_at_ms",
                params![key, value, now_ms],
            )
            .map_err(|e| {
                config_error(
                    "LT_DB_WRITE_FAILED",
                    "failed writing sync config",
                    serde_json::json!({ "error": e.to_string(), "key": key }),
                )
            })?;
        Ok(())
    }

    fn clear(&self, key: &str) -> AppResult<()> {
        self.conn()?
            .execute("DELETE FROM sync_config WHERE config_key=?1", [key])
            .map_err(|e| {
                config_error(
                    "LT_DB_WRITE_FAILED",
                    "failed clearing sync config",
                    serde_json::json!({ "error": e.to_string(), "key": key }),
                )
            })?;
        Ok(())
    }
}

pub trait EndpointCredentials: Serialize + DeserializeOwned + Clone {
    const CONFIG_KEY: &'static str;
    const LABEL: &'static str;

    fn validate(&self) -> AppResult<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebDavCredentials {
    pub url: String,
    pub username: String,
    pub password: String,
}

impl EndpointCredentials for WebDavCredentials {
    const CONFIG_KEY: &'static str = "webdav_endpoint";
    const LABEL: &'static str = "WebDAV";

    fn validate(&self) -> AppResult<()> {
        let url = reqwest::Url::parse(self.url.trim()).map_err(|e| {
            config_error(
                "LT_CONFIG_INVALID",
                "webdav url is not a valid url",
                serde_json::json!({ "error": e.to_string(), "url": self.url }),
            )
        })?;
        let is_local = url
            .host_str()
            .map(|h| {
                matches!(
                    h.to_ascii_lowercase().as_str(),
                    "localhost" | "127.0.0.1" | "::1" | "[::1]"
                )
            })
            .unwrap_or(false);
        if url.scheme() != "https" && !(is_local && url.scheme() == "http") {
            return Err(config_error(
                "LT_CONFIG_INVALID",
                "webdav url must use https (plain http is only allowed for localhost)",
                serde_json::json!({ "url": self.url }),
            ));
        }
        if self.username.trim().is_empty() {
            return Err(config_error(
                "LT_CONFIG_INVALID",
                "webdav username is required",
                serde_json::json!({ "url": self.url }),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStorageCredentials {
    pub bucket_name: String,
    pub region: String,
    pub secret_id: String,
    pub secret_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl ObjectStorageCredentials {
    pub fn secret_id_hint(&self) -> String {
        let prefix: String = self.secret_id.chars().take(6).collect();
        format!("{}...", prefix)
    }
}

impl EndpointCredentials for ObjectStorageCredentials {
    const CONFIG_KEY: &'static str = "object_storage_endpoint";
    const LABEL: &'static str = "Object Storage";

    fn validate(&self) -> AppResult<()> {
        for (field, value) in [
            ("bucketName", &self.bucket_name),
            ("region", &self.region),
            ("secretId", &self.secret_id),
            ("secretKey", &self.secret_key),
        ] {
            if value.trim().is_empty() {
                return Err(config_error(
                    "LT_CONFIG_INVALID",
                    "object storage configuration is incomplete",
                    serde_json::json!({ "field": field }),
                ));
            }
        }
        if self.secret_id == self.secret_key {
            return Err(config_error(
                "LT_CONFIG_INVALID",
                "secretId and secretKey must differ",
                serde_json::json!({ "field": "secretKey", "reason": "secret_id_equals_secret_key" }),
            ));
        }
        Ok(())
    }
}

/// Saved credentials plus whether the endpoint is currently connected.
/// `credentials.is_some() && !connected` is a manual disconnect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncEndpointConfig<C> {
    pub credentials: Option<C>,
    pub connected: bool,
}

impl<C> Default for SyncEndpointConfig<C> {
    fn default() -> Self {
        Self {
            credentials: None,
            connected: false,
        }
    }
}

impl<C> SyncEndpointConfig<C> {
    pub fn should_auto_connect(&self) -> bool {
        self.credentials.is_some() && self.connected
    }

    pub fn is_manually_disconnected(&self) -> bool {
        self.credentials.is_some() && !self.connected
    }
}

pub fn load_endpoint<C: EndpointCredentials>(
    store: &dyn SyncConfigStore,
) -> AppResult<SyncEndpointConfig<C>> {
    let Some(raw) = store.get(C::CONFIG_KEY)? else {
        return Ok(SyncEndpointConfig::default());
    };
    serde_json::from_str(&raw).map_err(|e| {
        config_error(
            "LT_CONFIG_INVALID",
            "stored endpoint configuration is corrupt",
            serde_json::json!({ "error": e.to_string(), "key": C::CONFIG_KEY }),
        )
    })
}

pub fn save_endpoint<C: EndpointCredentials>(
    store: &dyn SyncConfigStore,
    config: &SyncEndpointConfig<C>,
    now_ms: i64,
) -> AppResult<()> {
    let raw = serde_json::to_string(config).map_err(|e| {
        config_error(
            "LT_CONFIG_INVALID",
            "failed encoding endpoint configuration",
            serde_json::json!({ "error": e.to_string(), "key": C::CONFIG_KEY }),
        )
    })?;
    store.set(C::CONFIG_KEY, &raw, now_ms)
}

/// Validates, round-trips to the remote, and only then stores the credentials
/// as connected. Validation failures never reach `make_backend`.
pub fn connect_endpoint<C, F>(
    store: &dyn SyncConfigStore,
    credentials: C,
    make_backend: F,
    now_ms: i64,
) -> AppResult<ConnectionCheck>
where
    C: EndpointCredentials,
    F: FnOnce(&C) -> AppResult<Box<dyn RemoteObjectBackend>>,
{
    credentials.validate()?;
    let backend = make_backend(&credentials)?;
    let check = backend.test_connection()?;
    if !check.ok {
        return Err(AppError::new(
            "LT_SYNC_AUTH_FAILED",
            "sync",
            "connection test did not succeed",
            false,
            serde_json::json!({
                "endpoint": C::LABEL,
                "message": check.message,
                "target": backend.target().display()
            }),
        ));
    }
    save_endpoint(
        store,
        &SyncEndpointConfig {
            credentials: Some(credentials),
            connected: true,
        },
        now_ms,
    )?;
    store.set(KEY_LAST_CHECK_MS, &now_ms.to_string(), now_ms)?;
    tracing::info!(endpoint = C::LABEL, "endpoint connected");
    Ok(check)
}

pub fn reconnect_endpoint<C, F>(
    store: &dyn SyncConfigStore,
    make_backend: F,
    now_ms: i64,
) -> AppResult<ConnectionCheck>
where
    C: EndpointCredentials,
    F: FnOnce(&C) -> AppResult<Box<dyn RemoteObjectBackend>>,
{
    let config = load_endpoint::<C>(store)?;
    let credentials = config.credentials.ok_or_else(|| {
        config_error(
            "LT_CONFIG_MISSING",
            "no saved credentials to reconnect with",
            serde_json::json!({ "endpoint": C::LABEL }),
        )
    })?;
    connect_endpoint(store, credentials, make_backend, now_ms)
}

/// Keeps the saved credentials so reconnecting does not require re-entering them.
pub fn disconnect_endpoint<C: EndpointCredentials>(
    store: &dyn SyncConfigStore,
    now_ms: i64,
) -> AppResult<SyncEndpointConfig<C>> {
    let mut config = load_endpoint::<C>(store)?;
    config.connected = false;
    save_endpoint(store, &config, now_ms)?;
    tracing::info!(endpoint = C::LABEL, "endpoint manually disconnected");
    Ok(config)
}

pub fn forget_endpoint<C: EndpointCredentials>(store: &dyn SyncConfigStore) -> AppResult<()> {
    store.clear(C::CONFIG_KEY)
}

fn read_ms(store: &dyn SyncConfigStore, key: &str) -> AppResult<Option<i64>> {
    match store.get(key)? {
        Some(raw) => raw.trim().parse::<i64>().map(Some).map_err(|e| {
            config_error(
                "LT_CONFIG_INVALID",
                "stored timestamp is not an integer",
                serde_json::json!({ "error": e.to_string(), "key": key }),
            )
        }),
        None => Ok(None),
    }
}

pub fn last_sync_ms(store: &dyn SyncConfigStore) -> AppResult<Option<i64>> {
    read_ms(store, KEY_LAST_SYNC_MS)
}

pub fn last_check_ms(store: &dyn SyncConfigStore) -> AppResult<Option<i64>> {
    read_ms(store, KEY_LAST_CHECK_MS)
}

pub fn record_last_sync(store: &dyn SyncConfigStore, now_ms: i64) -> AppResult<()> {
    store.set(KEY_LAST_SYNC_MS, &now_ms.to_string(), now_ms)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActiveEndpoint {
    WebDav(WebDavCredentials),
    ObjectStorage(ObjectStorageCredentials),
}

impl ActiveEndpoint {
    pub fn open_backend(&self) -> AppResult<Box<dyn RemoteObjectBackend>> {
        match self {
            ActiveEndpoint::WebDav(creds) => Ok(Box::new(WebDavBackend::new(creds.clone())?)),
            ActiveEndpoint::ObjectStorage(creds) => Ok(Box::new(S3Backend::new(creds.clone())?)),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ActiveEndpoint::WebDav(_) => WebDavCredentials::LABEL,
            ActiveEndpoint::ObjectStorage(_) => ObjectStorageCredentials::LABEL,
        }
    }
}

/// A connected object storage endpoint wins over a connected WebDAV endpoint.
pub fn active_endpoint(store: &dyn SyncConfigStore) -> AppResult<Option<ActiveEndpoint>> {
    let object_storage = load_endpoint::<ObjectStorageCredentials>(store)?;
    if object_storage.should_auto_connect() {
        return Ok(object_storage.credentials.map(ActiveEndpoint::ObjectStorage));
    }
    let webdav = load_endpoint::<WebDavCredentials>(store)?;
    if webdav.should_auto_connect() {
        return Ok(webdav.credentials.map(ActiveEndpoint::WebDav));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object_storage(secret_id: &str, secret_key: &str) -> ObjectStorageCredentials {
        ObjectStorageCredentials {
            bucket_name: "journal-1250000000".to_string(),
            region: "ap-shanghai".to_string(),
            secret_id: secret_id.to_string(),
            secret_key: secret_key.to_string(),
            endpoint: None,
        }
    }

    #[test]
    fn object_storage_rejects_identical_secret_pair() {
        let err = object_storage("AKIDsame", "AKIDsame")
            .validate()
            .expect_err("identical secrets");
        assert_eq!(err.code, "LT_CONFIG_INVALID");
        assert_eq!(err.message, "secretId and secretKey must differ");
        assert!(object_storage("AKIDone", "key-two").validate().is_ok());
    }

    #[test]
    fn object_storage_rejects_blank_fields() {
        let err = object_storage("", "key").validate().expect_err("blank id");
        assert_eq!(err.details["field"], "secretId");
    }

    #[test]
    fn webdav_requires_https_outside_localhost() {
        let creds = |url: &str| WebDavCredentials {
            url: url.to_string(),
            username: "me".to_string(),
            password: "pw".to_string(),
        };
        assert!(creds("https://dav.jianguoyun.com/dav/").validate().is_ok());
        assert!(creds("http://localhost:8080/dav").validate().is_ok());
        let err = creds("http://nas.example.com/dav")
            .validate()
            .expect_err("plain http");
        assert_eq!(err.code, "LT_CONFIG_INVALID");
        assert!(creds("not a url").validate().is_err());
    }

    #[test]
    fn secret_id_hint_truncates() {
        assert_eq!(object_storage("AKID1234567890", "k").secret_id_hint(), "AKID12...");
    }
}
