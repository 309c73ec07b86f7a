use crate::app_error::AppError;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyLevel {
    Success,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationV1 {
    pub level: NotifyLevel,
    pub operation: String,
    pub phase: Option<String>,
    pub message: String,
    pub failed_count: Option<usize>,
}

impl NotificationV1 {
    pub fn success(operation: &str, message: impl Into<String>) -> Self {
        Self {
            level: NotifyLevel::Success,
            operation: operation.to_string(),
            phase: None,
            message: message.into(),
            failed_count: None,
        }
    }

    pub fn info(operation: &str, message: impl Into<String>) -> Self {
        Self {
            level: NotifyLevel::Info,
            ..Self::success(operation, message)
        }
    }

    pub fn partial(operation: &str, message: impl Into<String>, failed_count: usize) -> Self {
        Self {
            level: NotifyLevel::Warning,
            failed_count: Some(failed_count),
            ..Self::success(operation, message)
        }
    }

    pub fn failure(operation: &str, err: &AppError) -> Self {
        Self {
            level: NotifyLevel::Error,
            operation: operation.to_string(),
            phase: err.phase().map(str::to_string),
            message: match err.phase() {
                Some(phase) => format!("{} failed during {}: {}", operation, phase, err.message),
                None => format!("{} failed: {}", operation, err.message),
            },
            failed_count: None,
        }
    }
}

/// Sink for user-visible outcome messages.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: NotificationV1);
}

/// Asked before a restore continues without a safety backup.
pub trait ConfirmPrompt: Send + Sync {
    fn confirm(&self, question: &str, cause: &AppError) -> bool;
}

pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, n: NotificationV1) {
        match n.level {
            NotifyLevel::Error => {
                tracing::error!(operation = %n.operation, phase = ?n.phase, "{}", n.message)
            }
            NotifyLevel::Warning => tracing::warn!(
                operation = %n.operation,
                failed = ?n.failed_count,
                "{}",
                n.message
            ),
            _ => tracing::info!(operation = %n.operation, "{}", n.message),
        }
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<NotificationV1>>,
}

impl RecordingNotifier {
    pub fn take(&self) -> Vec<NotificationV1> {
        match self.seen.lock() {
            Ok(mut seen) => std::mem::take(&mut *seen),
            Err(_) => Vec::new(),
        }
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: NotificationV1) {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(notification);
        }
    }
}

/// Answers every prompt the same way; `FixedConfirm(false)` is the safe default
/// for non-interactive callers.
pub struct FixedConfirm(pub bool);

impl ConfirmPrompt for FixedConfirm {
    fn confirm(&self, question: &str, cause: &AppError) -> bool {
        tracing::warn!(code = %cause.code, answer = self.0, "{}", question);
        self.0
    }
}
