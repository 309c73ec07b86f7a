use crate::app_error::{AppError, AppResult};
use crate::remote::{ConnectionCheck, RemoteEntry, RemoteObjectBackend, SyncTargetUri};
use crate::remote_fs::FsBackend;
use crate::sync_config::{EndpointCredentials, ObjectStorageCredentials};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct S3Backend {
    pub bucket: String,
    pub prefix: String,
    pub region: String,
    pub endpoint_url: Option<String>,
    secret_id: String,
    secret_key: String,
    emulated: Option<FsBackend>,
}

impl S3Backend {
    pub fn new(credentials: ObjectStorageCredentials) -> AppResult<Self> {
        credentials.validate()?;
        Ok(Self {
            bucket: credentials.bucket_name,
            prefix: String::new(),
            region: credentials.region,
            endpoint_url: credentials
                .endpoint
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty()),
            secret_id: credentials.secret_id,
            secret_key: credentials.secret_key,
            emulated: None,
        })
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.trim_matches('/').to_string();
        self
    }

    /// Routes every operation to `<root>/<bucket>/<prefix>` on the local disk.
    pub fn with_emulate_root(mut self, root: PathBuf) -> Self {
        let mut path = root.join(&self.bucket);
        if !self.prefix.is_empty() {
            path = path.join(&self.prefix);
        }
        self.emulated = Some(FsBackend::new(&path));
        self
    }

    pub fn key_for(&self, leaf: &str) -> String {
        let leaf = leaf.trim_start_matches('/');
        if self.prefix.is_empty() {
            leaf.to_string()
        } else {
            format!("{}/{}", self.prefix, leaf)
        }
    }

    fn strip_prefix<'a>(&self, key: &'a str) -> &'a str {
        if self.prefix.is_empty() {
            return key;
        }
        key.strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(key)
    }

    fn classify_remote_error(message: &str) -> (&'static str, bool) {
        let lower = message.to_ascii_lowercase();
        if lower.contains("credential")
            || lower.contains("accessdenied")
            || lower.contains("signature")
            || lower.contains("invalidaccesskeyid")
            || lower.contains("unauthorized")
            || lower.contains("forbidden")
            || lower.contains("403")
        {
            ("LT_SYNC_AUTH_FAILED", false)
        } else if lower.contains("quota") || lower.contains("entitytoolarge") {
            ("LT_SYNC_REMOTE_REJECTED", false)
        } else {
            ("LT_SYNC_NETWORK_FAILED", true)
        }
    }

    fn map_remote_error(&self, message: String, operation: &str, key: &str) -> AppError {
        let (code, retryable) = Self::classify_remote_error(&message);
        AppError::new(
            code,
            "sync",
            &format!("failed {operation} s3 object"),
            retryable,
            serde_json::json!({
                "error": message,
                "bucket": self.bucket,
                "key": key
            }),
        )
    }

    fn run_async<T>(&self, fut: impl std::future::Future<Output = AppResult<T>>) -> AppResult<T> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                AppError::new(
                    "LT_SYNC_NETWORK_FAILED",
                    "sync",
                    "failed creating async runtime for s3 sync",
                    true,
                    serde_json::json!({ "error": e.to_string() }),
                )
            })?;
        rt.block_on(fut)
    }

    async fn build_client(&self) -> aws_sdk_s3::Client {
        let credentials = aws_sdk_s3::config::Credentials::new(
            self.secret_id.clone(),
            self.secret_key.clone(),
            None,
            None,
            "lumostime",
        );
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(aws_sdk_s3::config::Region::new(self.region.clone()));
        if let Some(endpoint) = &self.endpoint_url {
            loader = loader.endpoint_url(endpoint.clone());
        }
        let cfg = loader.load().await;
        aws_sdk_s3::Client::new(&cfg)
    }

    fn is_not_found(message: &str) -> bool {
        message.contains("NoSuchKey")
            || message.contains("NotFound")
            || message.contains("status: 404")
    }
}

impl RemoteObjectBackend for S3Backend {
    fn target(&self) -> SyncTargetUri {
        SyncTargetUri::S3 {
            bucket: self.bucket.clone(),
            prefix: self.prefix.clone(),
        }
    }

    fn upload_blob(&self, name: &str, bytes: &[u8], content_type: &str) -> AppResult<()> {
        if let Some(fs) = &self.emulated {
            return fs.upload_blob(name, bytes, content_type);
        }
        let key = self.key_for(name);
        let payload = bytes.to_vec();
        tracing::debug!(bucket = %self.bucket, key = %key, size = payload.len(), "s3 put");
        self.run_async(async {
            let client = self.build_client().await;
            client
                .put_object()
                .bucket(&self.bucket)
                .key(&key)
                .content_type(content_type)
                .body(payload.into())
                .send()
                .await
                .map_err(|e| self.map_remote_error(e.to_string(), "writing", &key))?;
            Ok(())
        })
    }

    fn download_blob(&self, name: &str) -> AppResult<Option<Vec<u8>>> {
        if let Some(fs) = &self.emulated {
            return fs.download_blob(name);
        }
        let key = self.key_for(name);
        tracing::debug!(bucket = %self.bucket, key = %key, "s3 get");
        self.run_async(async {
            let client = self.build_client().await;
            let out = match client.get_object().bucket(&self.bucket).key(&key).send().await {
                Ok(v) => v,
                Err(e) => {
                    let msg = format!("{:?}", e);
                    if Self::is_not_found(&msg) {
                        return Ok(None);
                    }
                    return Err(self.map_remote_error(msg, "reading", &key));
                }
            };
            let bytes = out.body.collect().await.map_err(|e| {
                self.map_remote_error(e.to_string(), "collecting response body for", &key)
            })?;
            Ok(Some(bytes.into_bytes().to_vec()))
        })
    }

    fn list_entries(&self, prefix: &str) -> AppResult<Vec<RemoteEntry>> {
        if let Some(fs) = &self.emulated {
            return fs.list_entries(prefix);
        }
        let key_prefix = self.key_for(prefix);
        tracing::debug!(bucket = %self.bucket, prefix = %key_prefix, "s3 list");
        self.run_async(async {
            let client = self.build_client().await;
            let mut entries = Vec::new();
            let mut continuation: Option<String> = None;
            loop {
                let mut req = client.list_objects_v2().bucket(&self.bucket);
                if !key_prefix.is_empty() {
                    req = req.prefix(&key_prefix);
                }
                if let Some(token) = continuation.take() {
                    req = req.continuation_token(token);
                }
                let out = req
                    .send()
                    .await
                    .map_err(|e| self.map_remote_error(format!("{:?}", e), "listing", &key_prefix))?;
                for object in out.contents() {
                    let Some(key) = object.key() else {
                        continue;
                    };
                    let name = self.strip_prefix(key);
                    let modified = object
                        .last_modified()
                        .and_then(|t| t.to_millis().ok())
                        .unwrap_or(0);
                    if key.ends_with('/') {
                        entries.push(RemoteEntry::dir(name, modified));
                    } else {
                        let size = object.size().unwrap_or(0).max(0) as u64;
                        entries.push(RemoteEntry::file(name, size, modified));
                    }
                }
                match out.next_continuation_token() {
                    Some(token) if out.is_truncated().unwrap_or(false) => {
                        continuation = Some(token.to_string());
                    }
                    _ => break,
                }
            }
            Ok(entries)
        })
    }

    fn delete_blob(&self, name: &str) -> AppResult<()> {
        if let Some(fs) = &self.emulated {
            return fs.delete_blob(name);
        }
        let key = self.key_for(name);
        tracing::debug!(bucket = %self.bucket, key = %key, "s3 delete");
        self.run_async(async {
            let client = self.build_client().await;
            match client.delete_object().bucket(&self.bucket).key(&key).send().await {
                Ok(_) => Ok(()),
                Err(e) => {
                    let msg = format!("{:?}", e);
                    if Self::is_not_found(&msg) {
                        Ok(())
                    } else {
                        Err(self.map_remote_error(msg, "deleting", &key))
                    }
                }
            }
        })
    }

    fn test_connection(&self) -> AppResult<ConnectionCheck> {
        if let Some(fs) = &self.emulated {
            return fs.test_connection();
        }
        tracing::debug!(bucket = %self.bucket, region = %self.region, "s3 connection check");
        self.run_async(async {
            let client = self.build_client().await;
            let mut req = client.list_objects_v2().bucket(&self.bucket).max_keys(1);
            if !self.prefix.is_empty() {
                req = req.prefix(format!("{}/", self.prefix));
            }
            req.send()
                .await
                .map_err(|e| self.map_remote_error(format!("{:?}", e), "listing", &self.prefix))?;
            Ok(ConnectionCheck {
                ok: true,
                message: Some(format!("bucket {} reachable", self.bucket)),
            })
        })
    }
}
