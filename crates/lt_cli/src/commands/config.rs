use crate::commands::workspace::{read_env_secret, s3_backend, Workspace};
use lt_core::app_error::AppResult;
use lt_core::remote::{ConnectionCheck, RemoteObjectBackend};
use lt_core::remote_webdav::WebDavBackend;
use lt_core::sync_config::{
    active_endpoint, connect_endpoint, disconnect_endpoint, forget_endpoint, last_check_ms,
    last_sync_ms, load_endpoint, reconnect_endpoint, EndpointCredentials,
    ObjectStorageCredentials, WebDavCredentials,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct EndpointChangeV1 {
    pub endpoint: String,
    pub action: String,
    pub connected: bool,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WebDavSummaryV1 {
    pub url: String,
    pub username: String,
    pub connected: bool,
}

#[derive(Debug, Serialize)]
pub struct ObjectStorageSummaryV1 {
    pub bucket_name: String,
    pub region: String,
    pub secret_id_hint: String,
    pub endpoint: Option<String>,
    pub connected: bool,
}

/// Credentials are redacted; passwords and secret keys never leave the store.
#[derive(Debug, Serialize)]
pub struct ConfigShowV1 {
    pub webdav: Option<WebDavSummaryV1>,
    pub object_storage: Option<ObjectStorageSummaryV1>,
    pub active: Option<String>,
    pub last_sync_ms: Option<i64>,
    pub last_check_ms: Option<i64>,
}

fn webdav_backend(creds: &WebDavCredentials) -> AppResult<Box<dyn RemoteObjectBackend>> {
    Ok(Box::new(WebDavBackend::new(creds.clone())?))
}

fn object_storage_backend(
    creds: &ObjectStorageCredentials,
) -> AppResult<Box<dyn RemoteObjectBackend>> {
    Ok(Box::new(s3_backend(creds.clone(), "")?))
}

fn connected<C: EndpointCredentials>(action: &str, check: ConnectionCheck) -> EndpointChangeV1 {
    EndpointChangeV1 {
        endpoint: C::LABEL.to_string(),
        action: action.to_string(),
        connected: check.ok,
        message: check.message,
    }
}

fn changed<C: EndpointCredentials>(action: &str) -> EndpointChangeV1 {
    EndpointChangeV1 {
        endpoint: C::LABEL.to_string(),
        action: action.to_string(),
        connected: false,
        message: None,
    }
}

pub fn run_webdav_connect(
    ws: &Workspace,
    url: &str,
    username: &str,
    password_env: &str,
    now_ms: i64,
) -> AppResult<EndpointChangeV1> {
    let creds = WebDavCredentials {
        url: url.trim().to_string(),
        username: username.trim().to_string(),
        password: read_env_secret(password_env)?,
    };
    let check = connect_endpoint(&ws.config, creds, webdav_backend, now_ms)?;
    Ok(connected::<WebDavCredentials>("connect", check))
}

pub fn run_webdav_reconnect(ws: &Workspace, now_ms: i64) -> AppResult<EndpointChangeV1> {
    let check = reconnect_endpoint::<WebDavCredentials, _>(&ws.config, webdav_backend, now_ms)?;
    Ok(connected::<WebDavCredentials>("reconnect", check))
}

pub fn run_object_storage_connect(
    ws: &Workspace,
    creds: ObjectStorageCredentials,
    now_ms: i64,
) -> AppResult<EndpointChangeV1> {
    let check = connect_endpoint(&ws.config, creds, object_storage_backend, now_ms)?;
    Ok(connected::<ObjectStorageCredentials>("connect", check))
}

pub fn run_object_storage_reconnect(ws: &Workspace, now_ms: i64) -> AppResult<EndpointChangeV1> {
    let check = reconnect_endpoint::<ObjectStorageCredentials, _>(
        &ws.config,
        object_storage_backend,
        now_ms,
    )?;
    Ok(connected::<ObjectStorageCredentials>("reconnect", check))
}

pub fn run_disconnect<C: EndpointCredentials>(
    ws: &Workspace,
    now_ms: i64,
) -> AppResult<EndpointChangeV1> {
    disconnect_endpoint::<C>(&ws.config, now_ms)?;
    Ok(changed::<C>("disconnect"))
}

pub fn run_forget<C: EndpointCredentials>(ws: &Workspace) -> AppResult<EndpointChangeV1> {
    forget_endpoint::<C>(&ws.config)?;
    Ok(changed::<C>("forget"))
}

pub fn run_show(ws: &Workspace) -> AppResult<ConfigShowV1> {
    let webdav = load_endpoint::<WebDavCredentials>(&ws.config)?;
    let object_storage = load_endpoint::<ObjectStorageCredentials>(&ws.config)?;
    Ok(ConfigShowV1 {
        webdav: webdav.credentials.as_ref().map(|c| WebDavSummaryV1 {
            url: c.url.clone(),
            username: c.username.clone(),
            connected: webdav.connected,
        }),
        object_storage: object_storage
            .credentials
            .as_ref()
            .map(|c| ObjectStorageSummaryV1 {
                bucket_name: c.bucket_name.clone(),
                region: c.region.clone(),
                secret_id_hint: c.secret_id_hint(),
                endpoint: c.endpoint.clone(),
                connected: object_storage.connected,
            }),
        active: active_endpoint(&ws.config)?.map(|e| e.label().to_string()),
        last_sync_ms: last_sync_ms(&ws.config)?,
        last_check_ms: last_check_ms(&ws.config)?,
    })
}
