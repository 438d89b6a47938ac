//! Snapshot of the supervisor's single job slot.

use serde::{Deserialize, Serialize};

use crate::crawler::{CrawlResult, CrawlerError, ErrorKind, FailureKinds, Mode, unix_now};

/// Lifecycle of the job slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    #[default]
    Idle,
    Running,
    Stopping,
}

impl TaskState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero_usize(v: &usize) -> bool {
    *v == 0
}

/// Status served by `GET /status` and streamed on `/ws/status`.
///
/// Empty fields are omitted from the JSON form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskStatus {
    pub state: TaskState,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub platform: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub crawler_type: String,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub started_at: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub finished_at: i64,

    #[serde(skip_serializing_if = "is_zero_usize")]
    pub processed: usize,
    #[serde(skip_serializing_if = "is_zero_usize")]
    pub succeeded: usize,
    #[serde(skip_serializing_if = "is_zero_usize")]
    pub failed: usize,
    #[serde(skip_serializing_if = "FailureKinds::is_empty")]
    pub failure_kinds: FailureKinds,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub last_error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub last_risk_hint: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub last_error_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_http_status: Option<u16>,
}

impl TaskStatus {
    /// Marks the slot running. Counts from the previous job are kept until
    /// this one finishes.
    pub(crate) fn begin(&mut self, platform: &str, mode: Mode) {
        self.state = TaskState::Running;
        self.platform = platform.to_string();
        self.crawler_type = mode.as_str().to_string();
        self.started_at = unix_now();
        self.finished_at = 0;
    }

    /// Records a finished job and returns the slot to idle.
    pub(crate) fn complete(&mut self, result: &CrawlResult, error: Option<&CrawlerError>) {
        self.state = TaskState::Idle;
        self.finished_at = if result.finished_at > 0 {
            result.finished_at
        } else {
            unix_now()
        };
        self.processed = result.processed;
        self.succeeded = result.succeeded;
        self.failed = result.failed;
        self.failure_kinds = result.failure_kinds.clone();

        match error {
            Some(err) => {
                self.last_error = err.to_string();
                self.last_error_kind = Some(err.kind());
                self.last_risk_hint = err
                    .risk()
                    .map(|hint| hint.as_str().to_string())
                    .unwrap_or_default();
                self.last_error_url = err.url().unwrap_or_default().to_string();
                self.last_http_status = err.http_status_code();
            }
            None => {
                self.last_error.clear();
                self.last_error_kind = None;
                self.last_risk_hint.clear();
                self.last_error_url.clear();
                self.last_http_status = None;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::crawler::{Request, RiskHint};

    // ==================== Serialization Tests ====================

    #[test]
    fn test_idle_status_omits_empty_fields() {
        let json = serde_json::to_value(TaskStatus::default()).unwrap();
        assert_eq!(json, serde_json::json!({"state": "idle"}));
    }

    #[test]
    fn test_running_status_fields() {
        let mut status = TaskStatus::default();
        status.begin("bilibili", Mode::Detail);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "running");
        assert_eq!(json["platform"], "bilibili");
        assert_eq!(json["crawler_type"], "detail");
        assert!(json["started_at"].as_i64().unwrap() > 0);
        assert!(json.get("finished_at").is_none());
    }

    // ==================== Completion Tests ====================

    #[test]
    fn test_complete_with_risk_error() {
        let request = Request {
            platform: "weibo".to_string(),
            ..Request::default()
        };
        let mut result = CrawlResult::start(&request);
        result.processed = 2;
        result.failed = 2;
        result.failure_kinds.insert(ErrorKind::RiskHint, 2);
        result.finish();
        let err = CrawlerError::risk_hint("weibo", "https://m.weibo.cn/x", RiskHint::Captcha);

        let mut status = TaskStatus::default();
        status.begin("weibo", Mode::Search);
        status.complete(&result, Some(&err));

        assert_eq!(status.state, TaskState::Idle);
        assert_eq!(status.failed, 2);
        assert_eq!(status.last_error_kind, Some(ErrorKind::RiskHint));
        assert_eq!(status.last_risk_hint, "captcha");
        assert_eq!(status.last_error_url, "https://m.weibo.cn/x");
        assert!(!status.last_error.is_empty());

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["last_error_kind"], "risk_hint");
        assert_eq!(json["failure_kinds"]["risk_hint"], 2);
    }

    #[test]
    fn test_success_clears_previous_error() {
        let mut status = TaskStatus {
            last_error: "boom".to_string(),
            last_error_kind: Some(ErrorKind::Http),
            last_http_status: Some(500),
            last_error_url: "https://x".to_string(),
            ..TaskStatus::default()
        };
        let mut result = CrawlResult::default();
        result.succeeded = 1;
        result.processed = 1;
        status.complete(&result, None);

        assert!(status.last_error.is_empty());
        assert_eq!(status.last_error_kind, None);
        assert_eq!(status.last_http_status, None);
        assert!(status.last_error_url.is_empty());
        assert_eq!(status.succeeded, 1);
        assert!(status.finished_at > 0);
    }
}
