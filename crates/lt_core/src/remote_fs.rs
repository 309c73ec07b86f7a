use crate::app_error::{AppError, AppResult};
use crate::remote::{ConnectionCheck, RemoteEntry, RemoteObjectBackend, SyncTargetUri};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

#[derive(Debug, Clone)]
pub struct FsBackend {
    pub root: PathBuf,
}

fn fs_error(message: &str, details: serde_json::Value) -> AppError {
    AppError::new("LT_SYNC_TARGET_INVALID", "sync", message, false, details)
}

fn modified_ms(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl FsBackend {
    pub fn new(path: &Path) -> Self {
        Self {
            root: path.to_path_buf(),
        }
    }

    fn path_for(&self, name: &str) -> AppResult<PathBuf> {
        let relative = name.trim_matches('/');
        if relative.split('/').any(|part| part == "..") {
            return Err(fs_error(
                "blob name escapes sync target root",
                serde_json::json!({ "name": name }),
            ));
        }
        Ok(self.root.join(relative))
    }
}

impl RemoteObjectBackend for FsBackend {
    fn target(&self) -> SyncTargetUri {
        SyncTargetUri::FilePath {
            path: self.root.display().to_string(),
        }
    }

    fn upload_blob(&self, name: &str, bytes: &[u8], _content_type: &str) -> AppResult<()> {
        let path = self.path_for(name)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                fs_error(
                    "failed creating sync target directory",
                    serde_json::json!({ "error": e.to_string(), "path": parent }),
                )
            })?;
        }
        std::fs::write(&path, bytes).map_err(|e| {
            fs_error(
                "failed writing sync blob",
                serde_json::json!({ "error": e.to_string(), "path": path }),
            )
        })
    }

    fn download_blob(&self, name: &str) -> AppResult<Option<Vec<u8>>> {
        let path = self.path_for(name)?;
        if !path.is_file() {
            return Ok(None);
        }
        std::fs::read(&path).map(Some).map_err(|e| {
            fs_error(
                "failed reading sync blob",
                serde_json::json!({ "error": e.to_string(), "path": path }),
            )
        })
    }

    fn list_entries(&self, prefix: &str) -> AppResult<Vec<RemoteEntry>> {
        let dir = self.path_for(prefix)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for entry in walkdir::WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| {
                fs_error(
                    "failed listing sync directory",
                    serde_json::json!({ "error": e.to_string(), "path": dir }),
                )
            })?;
            let rel = entry.path().strip_prefix(&self.root).map_err(|e| {
                fs_error(
                    "failed deriving relative sync path",
                    serde_json::json!({ "error": e.to_string(), "path": entry.path() }),
                )
            })?;
            let name = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            let metadata = entry.metadata().map_err(|e| {
                fs_error(
                    "failed reading sync entry metadata",
                    serde_json::json!({ "error": e.to_string(), "path": entry.path() }),
                )
            })?;
            if metadata.is_dir() {
                entries.push(RemoteEntry::dir(&name, modified_ms(&metadata)));
            } else {
                entries.push(RemoteEntry::file(
                    &name,
                    metadata.len(),
                    modified_ms(&metadata),
                ));
            }
        }
        Ok(entries)
    }

    fn delete_blob(&self, name: &str) -> AppResult<()> {
        let path = self.path_for(name)?;
        if !path.exists() {
            return Ok(());
        }
        std::fs::remove_file(&path).map_err(|e| {
            fs_error(
                "failed deleting sync blob",
                serde_json::json!({ "error": e.to_string(), "path": path }),
            )
        })
    }

    fn test_connection(&self) -> AppResult<ConnectionCheck> {
        std::fs::create_dir_all(&self.root).map_err(|e| {
            fs_error(
                "failed creating sync target root",
                serde_json::json!({ "error": e.to_string(), "path": self.root }),
            )
        })?;
        self.list_entries("")?;
        Ok(ConnectionCheck {
            ok: true,
            message: None,
        })
    }
}
