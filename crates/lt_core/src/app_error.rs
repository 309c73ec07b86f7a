use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub schema_version: u32,
    pub code: String,
    pub category: String,
    pub message: String,
    pub retryable: bool,
    pub details: Value,
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    LocalStateInvalid,
    Transport,
    Format,
    PartialCleanupFailure,
    Config,
    Busy,
    Cancelled,
    Storage,
    Internal,
}

impl ErrorKind {
    /// Format errors are reported to users exactly like transport errors.
    pub fn user_facing(self) -> ErrorKind {
        match self {
            ErrorKind::Format => ErrorKind::Transport,
            other => other,
        }
    }
}

impl AppError {
    pub fn new(code: &str, category: &str, message: &str, retryable: bool, details: Value) -> Self {
        Self {
            schema_version: 1,
            code: code.to_string(),
            category: category.to_string(),
            message: message.to_string(),
            retryable,
            details,
        }
    }

    pub fn internal(message: &str) -> Self {
        Self::new("LT_INTERNAL_ERROR", "internal", message, false, json!({}))
    }

    pub fn kind(&self) -> ErrorKind {
        match self.code.as_str() {
            "LT_LOCAL_STATE_INVALID" => ErrorKind::LocalStateInvalid,
            "LT_SYNC_NETWORK_FAILED"
            | "LT_SYNC_AUTH_FAILED"
            | "LT_SYNC_REMOTE_REJECTED"
            | "LT_SYNC_TARGET_INVALID" => ErrorKind::Transport,
            "LT_SYNC_FORMAT_INVALID" => ErrorKind::Format,
            "LT_CLEANUP_PARTIAL" => ErrorKind::PartialCleanupFailure,
            "LT_CONFIG_INVALID"
            | "LT_CONFIG_MISSING"
            | "LT_SYNC_NOT_CONNECTED"
            | "LT_SYNC_TARGET_UNSUPPORTED" => ErrorKind::Config,
            "LT_SYNC_IN_PROGRESS" => ErrorKind::Busy,
            "LT_SYNC_CANCELLED" => ErrorKind::Cancelled,
            code if code.starts_with("LT_DB_")
                || code.starts_with("LT_STORE_")
                || code.starts_with("LT_IMAGE_") =>
            {
                ErrorKind::Storage
            }
            _ => ErrorKind::Internal,
        }
    }

    /// Tags the error with the sync phase it occurred in, keeping existing details.
    pub fn in_phase(mut self, phase: &str) -> Self {
        if let Value::Object(map) = &mut self.details {
            map.insert("phase".to_string(), Value::String(phase.to_string()));
        } else {
            let inner = std::mem::take(&mut self.details);
            self.details = json!({ "phase": phase, "inner": inner });
        }
        self
    }

    pub fn phase(&self) -> Option<&str> {
        self.details.get("phase").and_then(|v| v.as_str())
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}
