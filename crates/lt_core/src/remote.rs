use crate::app_error::{AppError, AppResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const ROOT_SNAPSHOT_NAME: &str = "lumostime_backup.json";
pub const IMAGE_LIST_NAME: &str = "lumostime_images.json";
pub const BACKUPS_DIR: &str = "backups";
pub const IMAGES_DIR: &str = "images";
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
pub const BINARY_CONTENT_TYPE: &str = "application/octet-stream";

pub fn image_blob_name(media_id: &str) -> String {
    format!("{}/{}", IMAGES_DIR, media_id)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncTargetUri {
    FilePath { path: String },
    WebDav { url: String },
    S3 { bucket: String, prefix: String },
}

impl SyncTargetUri {
    pub fn parse(raw: &str) -> AppResult<Self> {
        if raw.trim().is_empty() {
            return Err(AppError::new(
                "LT_SYNC_TARGET_INVALID",
                "sync",
                "sync target is required",
                false,
                serde_json::json!({ "target": raw }),
            ));
        }

        if let Some(rest) = raw.strip_prefix("s3://") {
            let mut parts = rest.splitn(2, '/');
            let bucket = parts.next().unwrap_or_default().trim();
            let prefix = parts.next().unwrap_or_default().trim_matches('/');
            if bucket.is_empty() {
                return Err(AppError::new(
                    "LT_SYNC_TARGET_INVALID",
                    "sync",
                    "s3 target missing bucket",
                    false,
                    serde_json::json!({ "target": raw }),
                ));
            }
            return Ok(SyncTargetUri::S3 {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
            });
        }

        if let Some(rest) = raw.strip_prefix("file://") {
            if rest.trim().is_empty() {
                return Err(AppError::new(
                    "LT_SYNC_TARGET_INVALID",
                    "sync",
                    "file target missing path",
                    false,
                    serde_json::json!({ "target": raw }),
                ));
            }
            return Ok(SyncTargetUri::FilePath {
                path: rest.to_string(),
            });
        }

        if raw.starts_with("https://") || raw.starts_with("http://") {
            return Ok(SyncTargetUri::WebDav {
                url: raw.to_string(),
            });
        }

        if raw.contains("://") {
            return Err(AppError::new(
                "LT_SYNC_TARGET_UNSUPPORTED",
                "sync",
                "unsupported sync target scheme",
                false,
                serde_json::json!({ "target": raw }),
            ));
        }

        Ok(SyncTargetUri::FilePath {
            path: raw.to_string(),
        })
    }

    pub fn display(&self) -> String {
        match self {
            SyncTargetUri::FilePath { path } => path.clone(),
            SyncTargetUri::WebDav { url } => url.clone(),
            SyncTargetUri::S3 { bucket, prefix } => {
                if prefix.is_empty() {
                    format!("s3://{}", bucket)
                } else {
                    format!("s3://{}/{}", bucket, prefix)
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub file_name: String,
    pub is_dir: bool,
    pub size: u64,
    pub last_modified_ms: i64,
}

impl RemoteEntry {
    pub fn file(name: &str, size: u64, last_modified_ms: i64) -> Self {
        let name = name.trim_matches('/').to_string();
        Self {
            file_name: leaf_name(&name),
            name,
            is_dir: false,
            size,
            last_modified_ms,
        }
    }

    pub fn dir(name: &str, last_modified_ms: i64) -> Self {
        let name = name.trim_matches('/').to_string();
        Self {
            file_name: leaf_name(&name),
            name,
            is_dir: true,
            size: 0,
            last_modified_ms,
        }
    }
}

fn leaf_name(name: &str) -> String {
    name.rsplit('/').next().unwrap_or(name).to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionCheck {
    pub ok: bool,
    pub message: Option<String>,
}

pub trait RemoteObjectBackend: Send + Sync {
    fn target(&self) -> SyncTargetUri;

    /// Overwrites `name` if it already exists.
    fn upload_blob(&self, name: &str, bytes: &[u8], content_type: &str) -> AppResult<()>;

    /// `Ok(None)` when the object does not exist.
    fn download_blob(&self, name: &str) -> AppResult<Option<Vec<u8>>>;

    /// Transport-native listing; callers should go through `list_directory`.
    fn list_entries(&self, prefix: &str) -> AppResult<Vec<RemoteEntry>>;

    /// Deleting a missing object succeeds.
    fn delete_blob(&self, name: &str) -> AppResult<()>;

    fn test_connection(&self) -> AppResult<ConnectionCheck>;

    /// Lists the direct children of a directory. Transports disagree on whether
    /// a directory prefix carries a trailing separator, so the alternate form is
    /// tried before the directory is reported empty.
    fn list_directory(&self, prefix: &str) -> AppResult<Vec<RemoteEntry>> {
        let dir = prefix.trim_matches('/');
        if dir.is_empty() {
            return Ok(direct_children(dir, self.list_entries("")?));
        }
        let alternate = if prefix.ends_with('/') {
            dir.to_string()
        } else {
            format!("{}/", dir)
        };

        let entries = match self.list_entries(prefix) {
            Ok(entries) if !direct_children(dir, entries.clone()).is_empty() => entries,
            Ok(_) => match self.list_entries(&alternate) {
                Ok(entries) => entries,
                Err(err) => {
                    tracing::warn!(prefix = %alternate, code = %err.code, "alternate listing failed");
                    Vec::new()
                }
            },
            Err(err) => {
                tracing::warn!(prefix = %prefix, code = %err.code, "listing failed, retrying alternate form");
                self.list_entries(&alternate).map_err(|_| err)?
            }
        };
        Ok(direct_children(dir, entries))
    }
}

/// Keeps entries that sit directly under `dir`, deduplicated and sorted by name.
pub fn direct_children(dir: &str, entries: Vec<RemoteEntry>) -> Vec<RemoteEntry> {
    let dir = dir.trim_matches('/');
    let mut out: BTreeMap<String, RemoteEntry> = BTreeMap::new();
    for entry in entries {
        let rest = if dir.is_empty() {
            Some(entry.name.as_str())
        } else {
            entry
                .name
                .strip_prefix(dir)
                .and_then(|r| r.strip_prefix('/'))
        };
        let Some(rest) = rest else {
            continue;
        };
        if rest.is_empty() || rest.contains('/') {
            continue;
        }
        out.entry(entry.name.clone()).or_insert(entry);
    }
    out.into_values().collect()
}

pub fn upload_json<T: Serialize>(
    backend: &dyn RemoteObjectBackend,
    name: &str,
    value: &T,
) -> AppResult<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| {
        AppError::new(
            "LT_SYNC_FORMAT_INVALID",
            "sync",
            "failed serializing json document",
            false,
            serde_json::json!({ "error": e.to_string(), "name": name }),
        )
    })?;
    backend.upload_blob(name, &bytes, JSON_CONTENT_TYPE)
}

pub fn download_json<T: DeserializeOwned>(
    backend: &dyn RemoteObjectBackend,
    name: &str,
) -> AppResult<Option<T>> {
    let Some(bytes) = backend.download_blob(name)? else {
        return Ok(None);
    };
    serde_json::from_slice::<T>(&bytes).map(Some).map_err(|e| {
        AppError::new(
            "LT_SYNC_FORMAT_INVALID",
            "sync",
            "remote document is not valid json for its type",
            false,
            serde_json::json!({
                "error": e.to_string(),
                "name": name,
                "target": backend.target().display()
            }),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_children_drops_nested_and_foreign_entries() {
        let entries = vec![
            RemoteEntry::file("backups/a.json", 1, 10),
            RemoteEntry::file("backups/old/b.json", 1, 10),
            RemoteEntry::file("backups_other/c.json", 1, 10),
            RemoteEntry::dir("backups/old", 10),
            RemoteEntry::dir("backups", 10),
            RemoteEntry::file("backups/a.json", 1, 10),
        ];
        let names: Vec<String> = direct_children("backups/", entries)
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["backups/a.json".to_string(), "backups/old".to_string()]);
    }

    #[test]
    fn remote_entry_derives_file_name() {
        let entry = RemoteEntry::file("/backups/local_backup_x.json", 3, 1);
        assert_eq!(entry.name, "backups/local_backup_x.json");
        assert_eq!(entry.file_name, "local_backup_x.json");
        assert!(!entry.is_dir);
    }
}
