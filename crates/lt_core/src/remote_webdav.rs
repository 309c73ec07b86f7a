//! WebDAV transport (Jianguoyun, Nextcloud, generic servers) over `reqwest`.

use crate::app_error::{AppError, AppResult};
use crate::remote::{ConnectionCheck, RemoteEntry, RemoteObjectBackend, SyncTargetUri};
use crate::sync_config::{EndpointCredentials, WebDavCredentials};
use base64::{engine::general_purpose, Engine as _};
use chrono::DateTime;
use reqwest::{Client, Method, StatusCode, Url};
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 3;
const PROPFIND_BODY: &str = r#"<?xml version="1.0"?><d:propfind xmlns:d="DAV:"><d:prop><d:resourcetype/><d:getlastmodified/><d:getcontentlength/></d:prop></d:propfind>"#;

pub struct WebDavBackend {
    base_url: Url,
    username: String,
    password: String,
    http: Client,
}

fn transport_error(
    code: &str,
    message: &str,
    retryable: bool,
    details: serde_json::Value,
) -> AppError {
    AppError::new(code, "sync", message, retryable, details)
}

fn status_error(status: StatusCode, operation: &str, name: &str) -> AppError {
    let (code, retryable) = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ("LT_SYNC_AUTH_FAILED", false),
        StatusCode::INSUFFICIENT_STORAGE | StatusCode::PAYLOAD_TOO_LARGE => {
            ("LT_SYNC_REMOTE_REJECTED", false)
        }
        s if s.is_server_error() => ("LT_SYNC_NETWORK_FAILED", true),
        _ => ("LT_SYNC_REMOTE_REJECTED", false),
    };
    transport_error(
        code,
        &format!("webdav {operation} failed"),
        retryable,
        serde_json::json!({
            "status": status.as_u16(),
            "reason": status.canonical_reason().unwrap_or(""),
            "name": name
        }),
    )
}

impl WebDavBackend {
    pub fn new(credentials: WebDavCredentials) -> AppResult<Self> {
        credentials.validate()?;
        let base_url = Url::parse(credentials.url.trim()).map_err(|e| {
            transport_error(
                "LT_CONFIG_INVALID",
                "invalid webdav url",
                false,
                serde_json::json!({ "error": e.to_string() }),
            )
        })?;
        let http = Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                transport_error(
                    "LT_SYNC_NETWORK_FAILED",
                    "failed building http client",
                    false,
                    serde_json::json!({ "error": e.to_string() }),
                )
            })?;
        Ok(Self {
            base_url,
            username: credentials.username,
            password: credentials.password,
            http,
        })
    }

    fn auth_header(&self) -> String {
        let raw = format!("{}:{}", self.username, self.password);
        format!("Basic {}", general_purpose::STANDARD.encode(raw))
    }

    fn base_path(&self) -> String {
        decode_path(self.base_url.path())
            .trim_end_matches('/')
            .to_string()
    }

    fn build_url(&self, name: &str) -> Url {
        let mut url = self.base_url.clone();
        let mut path = url.path().trim_end_matches('/').to_string();
        path.push('/');
        path.push_str(name.trim_start_matches('/'));
        url.set_path(&path);
        url
    }

    fn method(name: &[u8]) -> AppResult<Method> {
        Method::from_bytes(name).map_err(|e| {
            AppError::internal(&format!("invalid webdav method: {e}"))
        })
    }

    fn run_async<T>(&self, fut: impl std::future::Future<Output = AppResult<T>>) -> AppResult<T> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                transport_error(
                    "LT_SYNC_NETWORK_FAILED",
                    "failed creating async runtime for webdav sync",
                    true,
                    serde_json::json!({ "error": e.to_string() }),
                )
            })?;
        rt.block_on(fut)
    }

    async fn request(
        &self,
        method: Method,
        name: &str,
        body: Option<Vec<u8>>,
        headers: &[(&str, &str)],
    ) -> AppResult<reqwest::Response> {
        let url = self.build_url(name);
        let mut last_error = None;

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(500 * (1 << attempt))).await;
                tracing::debug!(method = %method, attempt = attempt + 1, "webdav retry");
            }

            let mut builder = self
                .http
                .request(method.clone(), url.clone())
                .header("Authorization", self.auth_header());
            for (key, value) in headers {
                builder = builder.header(*key, *value);
            }
            if let Some(b) = &body {
                builder = builder.body(b.clone());
            }

            match builder.send().await {
                Ok(resp) => return Ok(resp),
                Err(e) => last_error = Some(e),
            }
        }

        Err(transport_error(
            "LT_SYNC_NETWORK_FAILED",
            "webdav request failed after retries",
            true,
            serde_json::json!({
                "method": method.as_str(),
                "name": name,
                "attempts": MAX_ATTEMPTS,
                "error": last_error.map(|e| e.to_string()).unwrap_or_default()
            }),
        ))
    }

    async fn ensure_directory(&self, path: &str) -> AppResult<()> {
        let mut current = String::new();
        for part in path.split('/').filter(|s| !s.is_empty()) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(part);
            let res = self
                .request(Self::method(b"MKCOL")?, &format!("{}/", current), None, &[])
                .await?;
            // 405 and 409 mean the collection already exists on most servers.
            if !matches!(
                res.status(),
                StatusCode::OK
                    | StatusCode::CREATED
                    | StatusCode::METHOD_NOT_ALLOWED
                    | StatusCode::CONFLICT
            ) {
                tracing::debug!(dir = %current, status = %res.status(), "webdav MKCOL");
            }
        }
        Ok(())
    }

    async fn propfind(&self, dir: &str, depth: &str) -> AppResult<Option<String>> {
        let res = self
            .request(
                Self::method(b"PROPFIND")?,
                dir,
                Some(PROPFIND_BODY.as_bytes().to_vec()),
                &[("Depth", depth), ("Content-Type", "application/xml")],
            )
            .await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !res.status().is_success() {
            return Err(status_error(res.status(), "PROPFIND", dir));
        }
        let xml = res.text().await.map_err(|e| {
            transport_error(
                "LT_SYNC_NETWORK_FAILED",
                "failed reading webdav PROPFIND response",
                true,
                serde_json::json!({ "error": e.to_string(), "name": dir }),
            )
        })?;
        Ok(Some(xml))
    }
}

impl RemoteObjectBackend for WebDavBackend {
    fn target(&self) -> SyncTargetUri {
        SyncTargetUri::WebDav {
            url: self.base_url.to_string(),
        }
    }

    fn upload_blob(&self, name: &str, bytes: &[u8], content_type: &str) -> AppResult<()> {
        tracing::debug!(name = %name, size = bytes.len(), "webdav put");
        self.run_async(async {
            if let Some((parent, _)) = name.trim_start_matches('/').rsplit_once('/') {
                self.ensure_directory(parent).await?;
            }
            let res = self
                .request(
                    Method::PUT,
                    name,
                    Some(bytes.to_vec()),
                    &[("Content-Type", content_type)],
                )
                .await?;
            if res.status().is_success() {
                Ok(())
            } else {
                Err(status_error(res.status(), "upload", name))
            }
        })
    }

    fn download_blob(&self, name: &str) -> AppResult<Option<Vec<u8>>> {
        tracing::debug!(name = %name, "webdav get");
        self.run_async(async {
            let res = self.request(Method::GET, name, None, &[]).await?;
            if res.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !res.status().is_success() {
                return Err(status_error(res.status(), "download", name));
            }
            let bytes = res.bytes().await.map_err(|e| {
                transport_error(
                    "LT_SYNC_NETWORK_FAILED",
                    "failed reading webdav response body",
                    true,
                    serde_json::json!({ "error": e.to_string(), "name": name }),
                )
            })?;
            Ok(Some(bytes.to_vec()))
        })
    }

    fn list_entries(&self, prefix: &str) -> AppResult<Vec<RemoteEntry>> {
        tracing::debug!(prefix = %prefix, "webdav list");
        let base_path = self.base_path();
        self.run_async(async {
            let Some(xml) = self.propfind(prefix, "1").await? else {
                return Ok(Vec::new());
            };
            parse_propfind_entries(&xml, &base_path, prefix)
        })
    }

    fn delete_blob(&self, name: &str) -> AppResult<()> {
        tracing::debug!(name = %name, "webdav delete");
        self.run_async(async {
            let res = self.request(Method::DELETE, name, None, &[]).await?;
            if res.status().is_success() || res.status() == StatusCode::NOT_FOUND {
                Ok(())
            } else {
                Err(status_error(res.status(), "delete", name))
            }
        })
    }

    fn test_connection(&self) -> AppResult<ConnectionCheck> {
        self.run_async(async {
            match self.propfind("", "0").await? {
                Some(_) => Ok(ConnectionCheck {
                    ok: true,
                    message: Some(format!("{} reachable", self.base_url)),
                }),
                None => Ok(ConnectionCheck {
                    ok: false,
                    message: Some("webdav root collection not found".to_string()),
                }),
            }
        })
    }
}

fn decode_path(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

fn relative_name(href: &str, base_path: &str) -> Option<String> {
    let path = if href.starts_with("http://") || href.starts_with("https://") {
        Url::parse(href).ok()?.path().to_string()
    } else {
        href.to_string()
    };
    let decoded = decode_path(&path);
    let rest = decoded.strip_prefix(base_path)?;
    if !base_path.is_empty() && !rest.is_empty() && !rest.starts_with('/') {
        return None;
    }
    Some(rest.trim_matches('/').to_string())
}

/// Parses a `Depth: 1` multistatus body into entries relative to the WebDAV
/// root, skipping the requested collection itself. A body that is not a
/// multistatus document is an error, never an empty directory.
pub fn parse_propfind_entries(
    xml: &str,
    base_path: &str,
    request_dir: &str,
) -> AppResult<Vec<RemoteEntry>> {
    let dav_ns = "DAV:";
    let doc = roxmltree::Document::parse(xml).map_err(|e| {
        transport_error(
            "LT_SYNC_FORMAT_INVALID",
            "webdav PROPFIND response is not valid xml",
            false,
            serde_json::json!({ "error": e.to_string(), "dir": request_dir }),
        )
    })?;
    if !doc.root_element().has_tag_name((dav_ns, "multistatus")) {
        return Err(transport_error(
            "LT_SYNC_FORMAT_INVALID",
            "webdav PROPFIND response is not a multistatus document",
            false,
            serde_json::json!({
                "root": doc.root_element().tag_name().name(),
                "dir": request_dir,
            }),
        ));
    }

    let request_dir = request_dir.trim_matches('/');
    let mut entries = Vec::new();

    for response in doc
        .descendants()
        .filter(|n| n.has_tag_name((dav_ns, "response")))
    {
        let href = response
            .descendants()
            .find(|n| n.has_tag_name((dav_ns, "href")))
            .and_then(|n| n.text())
            .unwrap_or_default();
        let Some(name) = relative_name(href, base_path) else {
            continue;
        };
        if name == request_dir {
            continue;
        }

        let is_collection = href.ends_with('/')
            || response
                .descendants()
                .any(|n| n.has_tag_name((dav_ns, "collection")));
        let modified = response
            .descendants()
            .find(|n| n.has_tag_name((dav_ns, "getlastmodified")))
            .and_then(|n| n.text())
            .and_then(|s| DateTime::parse_from_rfc2822(s.trim()).ok())
            .map(|dt| dt.timestamp_millis())
            .unwrap_or(0);

        if is_collection {
            entries.push(RemoteEntry::dir(&name, modified));
        } else {
            let size = response
                .descendants()
                .find(|n| n.has_tag_name((dav_ns, "getcontentlength")))
                .and_then(|n| n.text())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(0);
            entries.push(RemoteEntry::file(&name, size, modified));
        }
    }

    Ok(entries)
}
