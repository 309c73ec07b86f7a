use crate::app_error::{AppError, AppResult};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Media blobs kept on device, one file per media identifier.
pub struct LocalImageStore {
    pub images_dir: PathBuf,
}

fn image_error(code: &str, message: &str, details: serde_json::Value) -> AppError {
    AppError::new(code, "image_store", message, false, details)
}

impl LocalImageStore {
    pub fn new(images_dir: PathBuf) -> Self {
        Self { images_dir }
    }

    fn file_path_for(&self, media_id: &str) -> AppResult<PathBuf> {
        if media_id.is_empty()
            || media_id.contains('/')
            || media_id.contains('\\')
            || media_id == "."
            || media_id == ".."
        {
            return Err(image_error(
                "LT_IMAGE_ID_INVALID",
                "invalid media identifier",
                serde_json::json!({ "media_id": media_id }),
            ));
        }
        Ok(self.images_dir.join(media_id))
    }

    pub fn list(&self) -> AppResult<BTreeSet<String>> {
        if !self.images_dir.exists() {
            return Ok(BTreeSet::new());
        }
        let entries = fs::read_dir(&self.images_dir).map_err(|e| {
            image_error(
                "LT_IMAGE_READ_FAILED",
                "failed listing local images",
                serde_json::json!({ "error": e.to_string(), "path": self.images_dir }),
            )
        })?;
        let mut names = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                image_error(
                    "LT_IMAGE_READ_FAILED",
                    "failed reading local image entry",
                    serde_json::json!({ "error": e.to_string(), "path": self.images_dir }),
                )
            })?;
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.insert(name.to_string());
            }
        }
        Ok(names)
    }

    pub fn read(&self, media_id: &str) -> AppResult<Vec<u8>> {
        let path = self.file_path_for(media_id)?;
        fs::read(&path).map_err(|e| {
            image_error(
                "LT_IMAGE_READ_FAILED",
                "failed to read image bytes",
                serde_json::json!({ "error": e.to_string(), "path": path }),
            )
        })
    }

    pub fn write(&self, media_id: &str, bytes: &[u8]) -> AppResult<()> {
        let path = self.file_path_for(media_id)?;
        ensure_parent(&path)?;
        fs::write(&path, bytes).map_err(|e| {
            image_error(
                "LT_IMAGE_WRITE_FAILED",
                "failed to write image bytes",
                serde_json::json!({ "error": e.to_string(), "path": path }),
            )
        })
    }

    pub fn delete(&self, media_id: &str) -> AppResult<()> {
        let path = self.file_path_for(media_id)?;
        if !path.exists() {
            return Ok(());
        }
        fs::remove_file(&path).map_err(|e| {
            image_error(
                "LT_IMAGE_DELETE_FAILED",
                "failed to delete image",
                serde_json::json!({ "error": e.to_string(), "path": path }),
            )
        })
    }

    pub fn exists(&self, media_id: &str) -> AppResult<bool> {
        Ok(self.file_path_for(media_id)?.exists())
    }
}

fn ensure_parent(path: &Path) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            image_error(
                "LT_IMAGE_WRITE_FAILED",
                "failed to create images directory",
                serde_json::json!({ "error": e.to_string(), "path": parent }),
            )
        })?;
    }
    Ok(())
}
