use crate::app_error::{AppError, AppResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchFailureV1 {
    pub item: String,
    pub code: String,
    pub message: String,
}

/// Result of a best-effort batch: every item is attempted, one failure never
/// stops the rest.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchOutcomeV1 {
    pub succeeded: Vec<String>,
    pub failed: Vec<BatchFailureV1>,
}

impl BatchOutcomeV1 {
    pub fn succeeded_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// Reportable summary for a batch with failures; never returned as `Err`.
    pub fn partial_failure(&self, operation: &str) -> Option<AppError> {
        if self.failed.is_empty() {
            return None;
        }
        Some(AppError::new(
            "LT_CLEANUP_PARTIAL",
            "cleanup",
            &format!(
                "{} of {} {} deletions failed",
                self.failed.len(),
                self.failed.len() + self.succeeded.len(),
                operation
            ),
            true,
            serde_json::json!({
                "operation": operation,
                "succeeded": self.succeeded.len(),
                "failed": self.failed.len(),
                "items": self.failed.iter().map(|f| f.item.clone()).collect::<Vec<_>>()
            }),
        ))
    }
}

pub fn attempt_all<I, F>(items: I, operation: &str, mut f: F) -> BatchOutcomeV1
where
    I: IntoIterator<Item = String>,
    F: FnMut(&str) -> AppResult<()>,
{
    items
        .into_iter()
        .fold(BatchOutcomeV1::default(), |mut outcome, item| {
            match f(&item) {
                Ok(()) => outcome.succeeded.push(item),
                Err(err) => {
                    tracing::warn!(operation, item = %item, code = %err.code, "batch item failed");
                    outcome.failed.push(BatchFailureV1 {
                        item,
                        code: err.code,
                        message: err.message,
                    });
                }
            }
            outcome
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_do_not_stop_the_batch() {
        let items = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let mut seen = Vec::new();
        let outcome = attempt_all(items, "test", |item| {
            seen.push(item.to_string());
            if item == "b" {
                Err(AppError::internal("boom"))
            } else {
                Ok(())
            }
        });
        assert_eq!(seen, vec!["a", "b", "c"]);
        assert_eq!(outcome.succeeded, vec!["a".to_string(), "c".to_string()]);
        assert_eq!(outcome.failed_count(), 1);
        assert_eq!(outcome.failed[0].item, "b");

        let summary = outcome.partial_failure("image").expect("partial");
        assert_eq!(summary.code, "LT_CLEANUP_PARTIAL");
        assert_eq!(summary.details["failed"], 1);
        assert!(BatchOutcomeV1::default().partial_failure("image").is_none());
    }
}
