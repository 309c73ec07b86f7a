pub mod app_error;
pub mod backup;
pub mod batch;
pub mod db;
pub mod image_store;
pub mod images;
pub mod local_store;
pub mod notify;
pub mod remote;
pub mod remote_fs;
pub mod remote_s3;
pub mod remote_webdav;
pub mod snapshot;
pub mod sync;
pub mod sync_config;

pub use app_error::{AppError, AppResult, ErrorKind};
