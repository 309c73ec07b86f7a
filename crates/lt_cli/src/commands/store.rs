use crate::commands::workspace::Workspace;
use lt_core::app_error::{AppError, AppResult};
use lt_core::local_store::Collection;
use lt_core::snapshot::{encode_snapshot, parse_snapshot, produce_snapshot};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Serialize)]
pub struct StoreInitV1 {
    pub initialized: Vec<String>,
    pub last_modified_ms: i64,
}

#[derive(Debug, Serialize)]
pub struct StoreImportV1 {
    pub file: String,
    pub counts: BTreeMap<String, usize>,
    pub last_modified_ms: i64,
}

#[derive(Debug, Serialize)]
pub struct StoreExportV1 {
    pub file: String,
    pub bytes: usize,
    pub timestamp: i64,
}

#[derive(Debug, Serialize)]
pub struct StoreStatusV1 {
    pub counts: BTreeMap<String, Option<usize>>,
    pub user_personal_info_set: bool,
    pub last_modified_ms: i64,
    pub referenced_images: usize,
    pub local_images: usize,
}

pub fn run_init(ws: &Workspace, now_ms: i64) -> AppResult<StoreInitV1> {
    let mut state = ws.store.state()?;
    let missing = state.missing_collections();
    if missing.is_empty() {
        return Ok(StoreInitV1 {
            initialized: Vec::new(),
            last_modified_ms: ws.store.last_modified_ms(),
        });
    }
    for collection in &missing {
        state.collections.insert(*collection, Vec::new());
    }
    let initialized: Vec<String> = missing.iter().map(|c| c.key().to_string()).collect();
    ws.store.replace_all(state, now_ms)?;
    Ok(StoreInitV1 {
        initialized,
        last_modified_ms: ws.store.last_modified_ms(),
    })
}

/// Imports a snapshot file as a local edit: the last-modified time advances.
pub fn run_import(ws: &Workspace, file: &str, now_ms: i64) -> AppResult<StoreImportV1> {
    let bytes = std::fs::read(file).map_err(|e| {
        AppError::new(
            "LT_STORE_READ_FAILED",
            "local_store",
            "failed reading snapshot file",
            false,
            serde_json::json!({ "error": e.to_string(), "path": file }),
        )
    })?;
    let snapshot = parse_snapshot(&bytes)?;
    let counts = Collection::ALL
        .iter()
        .map(|c| (c.key().to_string(), snapshot.collection(*c).len()))
        .collect();
    ws.store.replace_all(snapshot.to_state(), now_ms)?;
    Ok(StoreImportV1 {
        file: file.to_string(),
        counts,
        last_modified_ms: ws.store.last_modified_ms(),
    })
}

pub fn run_export(ws: &Workspace, file: &str, now_ms: i64) -> AppResult<StoreExportV1> {
    let snapshot = produce_snapshot(&ws.store, now_ms)?;
    let bytes = encode_snapshot(&snapshot)?;
    if let Some(parent) = Path::new(file).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| write_failed(e, file))?;
    }
    std::fs::write(file, &bytes).map_err(|e| write_failed(e, file))?;
    Ok(StoreExportV1 {
        file: file.to_string(),
        bytes: bytes.len(),
        timestamp: snapshot.timestamp,
    })
}

fn write_failed(e: std::io::Error, file: &str) -> AppError {
    AppError::new(
        "LT_STORE_WRITE_FAILED",
        "local_store",
        "failed writing snapshot file",
        false,
        serde_json::json!({ "error": e.to_string(), "path": file }),
    )
}

pub fn run_status(ws: &Workspace) -> AppResult<StoreStatusV1> {
    let state = ws.store.state()?;
    Ok(StoreStatusV1 {
        counts: Collection::ALL
            .iter()
            .map(|c| (c.key().to_string(), state.get(*c).map(Vec::len)))
            .collect(),
        user_personal_info_set: state.user_personal_info.is_some(),
        last_modified_ms: ws.store.last_modified_ms(),
        referenced_images: ws.store.referenced_images()?.len(),
        local_images: ws.images.list()?.len(),
    })
}
