use crate::app_error::{AppError, AppResult};
use crate::batch::{attempt_all, BatchFailureV1, BatchOutcomeV1};
use crate::image_store::LocalImageStore;
use crate::local_store::LocalStore;
use crate::remote::{
    download_json, image_blob_name, upload_json, RemoteObjectBackend, BINARY_CONTENT_TYPE,
    IMAGES_DIR, IMAGE_LIST_NAME,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

pub const THUMBNAIL_PREFIX: &str = "thumb_";
pub const IMAGE_LIST_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageListDocumentV1 {
    pub images: Vec<String>,
    pub timestamp: i64,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageUsageV1 {
    pub image: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageUsageStatsV1 {
    pub total_references: usize,
    pub unique_images: usize,
    pub per_image: Vec<ImageUsageV1>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageCleanupReportV1 {
    pub referenced: Vec<String>,
    pub local_count: usize,
    pub local_orphans: Vec<String>,
    pub remote_count: Option<usize>,
    pub remote_orphans: Option<Vec<String>>,
    pub dangling: Vec<String>,
    pub usage: ImageUsageStatsV1,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CleanupOptions {
    pub delete_local: bool,
    pub delete_remote: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ImageCleanupResultV1 {
    pub local: Option<BatchOutcomeV1>,
    pub remote: Option<BatchOutcomeV1>,
    /// `LT_CLEANUP_PARTIAL` summary when any deletion failed.
    pub partial_failure: Option<AppError>,
    /// Ids the next sync removes from the remote image list.
    pub tombstoned: Vec<String>,
}

impl ImageCleanupResultV1 {
    fn outcomes(&self) -> impl Iterator<Item = &BatchOutcomeV1> {
        self.local.iter().chain(self.remote.iter())
    }

    pub fn deleted_count(&self) -> usize {
        self.outcomes().map(BatchOutcomeV1::succeeded_count).sum()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes().map(BatchOutcomeV1::failed_count).sum()
    }

    fn combined(&self) -> BatchOutcomeV1 {
        self.outcomes().fold(BatchOutcomeV1::default(), |mut all, o| {
            all.succeeded.extend(o.succeeded.iter().cloned());
            all.failed.extend(o.failed.iter().cloned());
            all
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ImageSyncResultV1 {
    pub uploaded: usize,
    pub downloaded: usize,
    #[serde(default)]
    pub deleted_remote: usize,
    pub errors: Vec<BatchFailureV1>,
}

fn record_images(record: &Value) -> impl Iterator<Item = &str> {
    record
        .get("images")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .filter(|s| !s.is_empty())
}

pub fn thumbnail_name(media_id: &str) -> String {
    format!("{}{}", THUMBNAIL_PREFIX, media_id)
}

/// Every media id attached to a record, plus the thumbnail of each.
pub fn compute_referenced_set(records: &[Value]) -> BTreeSet<String> {
    let mut referenced = BTreeSet::new();
    for image in records.iter().flat_map(record_images) {
        referenced.insert(image.to_string());
        if !image.starts_with(THUMBNAIL_PREFIX) {
            referenced.insert(thumbnail_name(image));
        }
    }
    referenced
}

pub fn usage_stats(records: &[Value]) -> ImageUsageStatsV1 {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for image in records.iter().flat_map(record_images) {
        *counts.entry(image).or_default() += 1;
    }
    let mut per_image: Vec<ImageUsageV1> = counts
        .into_iter()
        .map(|(image, count)| ImageUsageV1 {
            image: image.to_string(),
            count,
        })
        .collect();
    per_image.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.image.cmp(&b.image)));
    ImageUsageStatsV1 {
        total_references: per_image.iter().map(|u| u.count).sum(),
        unique_images: per_image.len(),
        per_image,
    }
}

/// Discards the stored reference list and replaces it with the one derived
/// from `records`.
pub fn rebuild_referenced_list_from_records(
    store: &LocalStore,
    records: &[Value],
    now_ms: i64,
) -> AppResult<Vec<String>> {
    let rebuilt: Vec<String> = compute_referenced_set(records).into_iter().collect();
    store.set_referenced_images(&rebuilt, now_ms)?;
    tracing::info!(count = rebuilt.len(), "referenced image list rebuilt");
    Ok(rebuilt)
}

pub fn list_remote_images(backend: &dyn RemoteObjectBackend) -> AppResult<BTreeSet<String>> {
    Ok(backend
        .list_directory(IMAGES_DIR)?
        .into_iter()
        .filter(|e| !e.is_dir)
        .map(|e| e.file_name)
        .collect())
}

/// Dry run: reports what `cleanup_unreferenced_images` would delete.
pub fn generate_cleanup_report(
    records: &[Value],
    local: &LocalImageStore,
    remote: Option<&dyn RemoteObjectBackend>,
) -> AppResult<ImageCleanupReportV1> {
    let referenced = compute_referenced_set(records);
    let local_blobs = local.list()?;
    let remote_blobs = remote.map(|r| list_remote_images(r)).transpose()?;

    let dangling = referenced
        .iter()
        .filter(|id| !id.starts_with(THUMBNAIL_PREFIX))
        .filter(|id| !local_blobs.contains(*id))
        .filter(|id| remote_blobs.as_ref().map_or(true, |r| !r.contains(*id)))
        .cloned()
        .collect();

    Ok(ImageCleanupReportV1 {
        local_count: local_blobs.len(),
        local_orphans: local_blobs.difference(&referenced).cloned().collect(),
        remote_count: remote_blobs.as_ref().map(BTreeSet::len),
        remote_orphans: remote_blobs
            .as_ref()
            .map(|r| r.difference(&referenced).cloned().collect()),
        dangling,
        usage: usage_stats(records),
        referenced: referenced.into_iter().collect(),
    })
}

impl ImageCleanupReportV1 {
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Image cleanup report\n");
        let _ = writeln!(out, "## Summary\n");
        let _ = writeln!(out, "- Referenced images (with thumbnails): {}", self.referenced.len());
        let _ = writeln!(out, "- Local images: {}", self.local_count);
        let _ = writeln!(out, "- Unreferenced local images: {}", self.local_orphans.len());
        match (&self.remote_count, &self.remote_orphans) {
            (Some(count), Some(orphans)) => {
                let _ = writeln!(out, "- Remote images: {}", count);
                let _ = writeln!(out, "- Unreferenced remote images: {}", orphans.len());
            }
            _ => {
                let _ = writeln!(out, "- Remote images: not checked");
            }
        }
        let _ = writeln!(out, "- Missing referenced images: {}", self.dangling.len());

        push_list(&mut out, "Unreferenced local images", &self.local_orphans);
        if let Some(orphans) = &self.remote_orphans {
            push_list(&mut out, "Unreferenced remote images", orphans);
        }
        push_list(&mut out, "Missing referenced images", &self.dangling);

        let _ = writeln!(out, "\n## Usage\n");
        let _ = writeln!(
            out,
            "{} references across {} images.\n",
            self.usage.total_references, self.usage.unique_images
        );
        for usage in &self.usage.per_image {
            let _ = writeln!(out, "- {} ({}x)", usage.image, usage.count);
        }
        out
    }
}

fn push_list(out: &mut String, title: &str, items: &[String]) {
    let _ = writeln!(out, "\n## {}\n", title);
    if items.is_empty() {
        let _ = writeln!(out, "None.");
        return;
    }
    for item in items {
        let _ = writeln!(out, "- {}", item);
    }
}

/// Deletes orphaned blobs per the flags. Referenced ids are filtered out again
/// right before each delete, whatever the caller passed.
pub fn cleanup_unreferenced_images(
    records: &[Value],
    local: &LocalImageStore,
    remote: Option<&dyn RemoteObjectBackend>,
    options: CleanupOptions,
) -> AppResult<ImageCleanupResultV1> {
    let referenced = compute_referenced_set(records);
    let mut result = ImageCleanupResultV1::default();

    if options.delete_local {
        let orphans: Vec<String> = local.list()?.difference(&referenced).cloned().collect();
        let outcome = attempt_all(
            orphans.into_iter().filter(|id| !referenced.contains(id)),
            "local image",
            |id| local.delete(id),
        );
        tracing::info!(
            deleted = outcome.succeeded_count(),
            failed = outcome.failed_count(),
            "local image cleanup finished"
        );
        result.local = Some(outcome);
    }

    if options.delete_remote {
        let backend = remote.ok_or_else(|| {
            AppError::new(
                "LT_SYNC_NOT_CONNECTED",
                "config",
                "remote image cleanup requested without a connected endpoint",
                false,
                serde_json::json!({}),
            )
        })?;
        let orphans: Vec<String> = list_remote_images(backend)?
            .difference(&referenced)
            .cloned()
            .collect();
        let outcome = attempt_all(
            orphans.into_iter().filter(|id| !referenced.contains(id)),
            "remote image",
            |id| backend.delete_blob(&image_blob_name(id)),
        );
        tracing::info!(
            deleted = outcome.succeeded_count(),
            failed = outcome.failed_count(),
            "remote image cleanup finished"
        );
        result.remote = Some(outcome);
    }

    result.partial_failure = result.combined().partial_failure("image");
    Ok(result)
}

/// Replaces the cached reference list with the one derived from `records` and
/// tombstones every deleted blob with its thumbnail, so the next sync neither
/// fetches them again nor keeps them in the remote list.
pub fn record_image_deletions(
    store: &LocalStore,
    records: &[Value],
    result: &mut ImageCleanupResultV1,
    now_ms: i64,
) -> AppResult<()> {
    let referenced: BTreeSet<String> = rebuild_referenced_list_from_records(store, records, now_ms)?
        .into_iter()
        .collect();
    let mut tombstones = BTreeSet::new();
    for id in result.combined().succeeded {
        if !id.starts_with(THUMBNAIL_PREFIX) {
            tombstones.insert(thumbnail_name(&id));
        }
        tombstones.insert(id);
    }
    let tombstones: Vec<String> = tombstones
        .into_iter()
        .filter(|id| !referenced.contains(id))
        .collect();
    store.track_deleted_images(&tombstones, now_ms)?;
    tracing::info!(count = tombstones.len(), "image deletions tracked");
    result.tombstoned = tombstones;
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeletionSweep {
    /// Tombstoned ids no record references; they must stay out of every list.
    pub removed: BTreeSet<String>,
    pub outcome: BatchOutcomeV1,
}

/// Pushes tracked deletions to the remote and clears local leftovers. A
/// tombstone whose id is referenced again is dropped without deleting anything.
pub fn sweep_deleted_images(
    store: &LocalStore,
    local: &LocalImageStore,
    backend: &dyn RemoteObjectBackend,
    records: &[Value],
    now_ms: i64,
) -> AppResult<DeletionSweep> {
    let tombstones = store.deleted_images()?;
    if tombstones.is_empty() {
        return Ok(DeletionSweep::default());
    }
    let referenced = compute_referenced_set(records);
    let (revived, removed): (BTreeSet<String>, BTreeSet<String>) = tombstones
        .into_iter()
        .partition(|id| referenced.contains(id));
    store.clear_deleted_images(&revived, now_ms)?;

    let outcome = attempt_all(removed.iter().cloned(), "tombstoned image", |id| {
        backend.delete_blob(&image_blob_name(id))?;
        local.delete(id)
    });
    tracing::info!(
        removed = outcome.succeeded_count(),
        failed = outcome.failed_count(),
        revived = revived.len(),
        "tracked image deletions swept"
    );
    Ok(DeletionSweep { removed, outcome })
}

/// Presence-based reconciliation: blobs only on one side are copied to the
/// other. Blobs on both sides are left alone.
pub fn sync_images(
    local: &LocalImageStore,
    backend: &dyn RemoteObjectBackend,
    local_list: &BTreeSet<String>,
    remote_list: &BTreeSet<String>,
) -> ImageSyncResultV1 {
    let to_upload = local_list.difference(remote_list).cloned();
    let uploaded = attempt_all(to_upload, "image upload", |id| {
        let bytes = local.read(id)?;
        backend.upload_blob(&image_blob_name(id), &bytes, BINARY_CONTENT_TYPE)
    });

    let to_download = remote_list.difference(local_list).cloned();
    let downloaded = attempt_all(to_download, "image download", |id| {
        let bytes = backend.download_blob(&image_blob_name(id))?.ok_or_else(|| {
            AppError::new(
                "LT_IMAGE_REMOTE_MISSING",
                "image_store",
                "remote image disappeared before download",
                true,
                serde_json::json!({ "media_id": id }),
            )
        })?;
        local.write(id, &bytes)
    });

    let result = ImageSyncResultV1 {
        uploaded: uploaded.succeeded_count(),
        downloaded: downloaded.succeeded_count(),
        deleted_remote: 0,
        errors: uploaded.failed.into_iter().chain(downloaded.failed).collect(),
    };
    tracing::info!(
        uploaded = result.uploaded,
        downloaded = result.downloaded,
        errors = result.errors.len(),
        "image sync finished"
    );
    result
}

/// Syncs only referenced images: local blobs that are referenced go up,
/// referenced remote blobs missing on device come down.
pub fn sync_referenced_images(
    local: &LocalImageStore,
    backend: &dyn RemoteObjectBackend,
    referenced: &BTreeSet<String>,
) -> AppResult<ImageSyncResultV1> {
    let local_list: BTreeSet<String> = local.list()?.intersection(referenced).cloned().collect();
    let remote_list: BTreeSet<String> = list_remote_images(backend)?
        .intersection(referenced)
        .cloned()
        .collect();
    Ok(sync_images(local, backend, &local_list, &remote_list))
}

/// After a restore, merges the restored records' references into the cached
/// list before any transfer so images already on device are not fetched again.
pub fn reconcile_after_restore(
    store: &LocalStore,
    local: &LocalImageStore,
    backend: &dyn RemoteObjectBackend,
    records: &[Value],
    now_ms: i64,
) -> AppResult<ImageSyncResultV1> {
    let tombstones = store.deleted_images()?;
    let mut merged = compute_referenced_set(records);
    merged.extend(
        store
            .referenced_images()?
            .into_iter()
            .filter(|id| !tombstones.contains(id)),
    );
    let merged_list: Vec<String> = merged.iter().cloned().collect();
    store.set_referenced_images(&merged_list, now_ms)?;
    sync_referenced_images(local, backend, &merged)
}

pub fn upload_image_list(
    backend: &dyn RemoteObjectBackend,
    images: &[String],
    now_ms: i64,
) -> AppResult<ImageListDocumentV1> {
    let doc = ImageListDocumentV1 {
        images: images.to_vec(),
        timestamp: now_ms,
        version: IMAGE_LIST_VERSION.to_string(),
    };
    upload_json(backend, IMAGE_LIST_NAME, &doc)?;
    Ok(doc)
}

pub fn download_image_list(
    backend: &dyn RemoteObjectBackend,
) -> AppResult<Option<ImageListDocumentV1>> {
    download_json(backend, IMAGE_LIST_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn referenced_set_includes_thumbnails_and_skips_junk() {
        let records = vec![
            json!({ "id": "1", "images": ["a.jpg", "b.png"] }),
            json!({ "id": "2", "images": ["a.jpg", 7, ""] }),
            json!({ "id": "3" }),
            json!({ "id": "4", "images": "not-an-array" }),
        ];
        let set: Vec<String> = compute_referenced_set(&records).into_iter().collect();
        assert_eq!(set, vec!["a.jpg", "b.png", "thumb_a.jpg", "thumb_b.png"]);
    }

    #[test]
    fn usage_stats_sort_by_frequency() {
        let records = vec![
            json!({ "images": ["b.png"] }),
            json!({ "images": ["a.jpg", "b.png"] }),
        ];
        let stats = usage_stats(&records);
        assert_eq!(stats.total_references, 3);
        assert_eq!(stats.unique_images, 2);
        assert_eq!(stats.per_image[0].image, "b.png");
        assert_eq!(stats.per_image[0].count, 2);
    }
}
