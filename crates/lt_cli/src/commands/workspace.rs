use lt_core::app_error::{AppError, AppResult};
use lt_core::image_store::LocalImageStore;
use lt_core::local_store::LocalStore;
use lt_core::notify::{ConfirmPrompt, NotificationV1, Notifier, NotifyLevel};
use lt_core::remote::{RemoteObjectBackend, SyncTargetUri};
use lt_core::remote_fs::FsBackend;
use lt_core::remote_s3::S3Backend;
use lt_core::remote_webdav::WebDavBackend;
use lt_core::sync_config::{
    active_endpoint, load_endpoint, ActiveEndpoint, ObjectStorageCredentials,
    SqliteSyncConfigStore, WebDavCredentials,
};
use serde::Serialize;
use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};

pub const S3_EMULATE_ROOT_ENV: &str = "LT_SYNC_S3_EMULATE_ROOT";

pub struct Workspace {
    pub store: LocalStore,
    pub images: LocalImageStore,
    pub config: SqliteSyncConfigStore,
}

impl Workspace {
    pub fn open(data_dir: &str) -> AppResult<Self> {
        let root = Path::new(data_dir);
        let db_path = root.join("db/local.sqlite");
        Ok(Self {
            store: LocalStore::open(&db_path)?,
            images: LocalImageStore::new(root.join("images")),
            config: SqliteSyncConfigStore::open(&db_path)?,
        })
    }

    /// `--target` wins; otherwise the connected endpoint, object storage first.
    pub fn backend(&self, target: Option<&str>) -> AppResult<Box<dyn RemoteObjectBackend>> {
        let Some(raw) = target else {
            let endpoint = active_endpoint(&self.config)?.ok_or_else(|| {
                AppError::new(
                    "LT_SYNC_NOT_CONNECTED",
                    "config",
                    "no sync endpoint is connected; run `config webdav connect`, `config s3 connect` or pass --target",
                    false,
                    serde_json::json!({}),
                )
            })?;
            tracing::debug!(endpoint = endpoint.label(), "using connected endpoint");
            return match endpoint {
                ActiveEndpoint::ObjectStorage(creds) => Ok(Box::new(s3_backend(creds, "")?)),
                other => other.open_backend(),
            };
        };

        match SyncTargetUri::parse(raw)? {
            SyncTargetUri::FilePath { path } => Ok(Box::new(FsBackend::new(Path::new(&path)))),
            SyncTargetUri::S3 { bucket, prefix } => {
                let mut creds = saved_credentials::<ObjectStorageCredentials>(&self.config)?;
                creds.bucket_name = bucket;
                Ok(Box::new(s3_backend(creds, &prefix)?))
            }
            SyncTargetUri::WebDav { url } => {
                let mut creds = saved_credentials::<WebDavCredentials>(&self.config)?;
                creds.url = url;
                Ok(Box::new(WebDavBackend::new(creds)?))
            }
        }
    }
}

fn saved_credentials<C: lt_core::sync_config::EndpointCredentials>(
    config: &SqliteSyncConfigStore,
) -> AppResult<C> {
    load_endpoint::<C>(config)?.credentials.ok_or_else(|| {
        AppError::new(
            "LT_CONFIG_MISSING",
            "config",
            "target needs saved credentials for this endpoint type",
            false,
            serde_json::json!({ "endpoint": C::LABEL }),
        )
    })
}

pub fn s3_backend(creds: ObjectStorageCredentials, prefix: &str) -> AppResult<S3Backend> {
    let backend = S3Backend::new(creds)?.with_prefix(prefix);
    Ok(match std::env::var(S3_EMULATE_ROOT_ENV) {
        Ok(root) if !root.trim().is_empty() => backend.with_emulate_root(PathBuf::from(root)),
        _ => backend,
    })
}

pub fn read_env_secret(name: &str) -> AppResult<String> {
    std::env::var(name).map_err(|_| {
        AppError::new(
            "LT_CONFIG_MISSING",
            "config",
            "secret environment variable is not set",
            false,
            serde_json::json!({ "env": name }),
        )
    })
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub struct StderrNotifier;

impl Notifier for StderrNotifier {
    fn notify(&self, n: NotificationV1) {
        let level = match n.level {
            NotifyLevel::Success => "ok",
            NotifyLevel::Info => "info",
            NotifyLevel::Warning => "warning",
            NotifyLevel::Error => "error",
        };
        eprintln!("[{}] {}", level, n.message);
    }
}

/// Asks on the terminal; answers no when stdin is not interactive.
pub struct TerminalConfirm;

impl ConfirmPrompt for TerminalConfirm {
    fn confirm(&self, question: &str, cause: &AppError) -> bool {
        let stdin = std::io::stdin();
        if !stdin.is_terminal() {
            return false;
        }
        eprint!("{} ({}) [y/N] ", question, cause.message);
        let _ = std::io::stderr().flush();
        let mut answer = String::new();
        if stdin.lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}
