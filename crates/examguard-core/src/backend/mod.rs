//! Assessment backend collaborators.
//!
//! The monitor consumes four request/response endpoints besides the proctor
//! collector: code execution, code analysis, identity and report generation.
//! [`AssessmentBackend`] is the seam; [`HttpApi`] is the production
//! implementation and also serves as the collector transport.

mod client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use client::HttpApi;
use crate::event::BrowserLogEntry;

// =============================================================================
// Error Types
// =============================================================================

/// Errors returned by backend calls.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BackendError {
    /// The request could not be sent or the connection failed.
    #[error("network error: {0}")]
    Network(String),

    /// The session is not authenticated.
    #[error("not authenticated")]
    Unauthorized,

    /// The backend answered with a non-success status.
    #[error("backend returned status {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body or a generic description.
        message: String,
    },

    /// The response body did not match the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The request body could not be encoded.
    #[error("failed to encode request: {0}")]
    Encode(String),

    /// The configured URL is unusable.
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

// =============================================================================
// Wire Types
// =============================================================================

/// Body of the execute and analyze endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeSubmission {
    /// Assessment the code belongs to.
    pub assessment_id: i64,
    /// Language identifier (`python`, `javascript`, `java`, ...).
    pub language: String,
    /// Source text.
    pub code: String,
}

/// Output of a sandboxed run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Captured standard output.
    #[serde(default)]
    pub stdout: String,
    /// Captured standard error.
    #[serde(default)]
    pub stderr: String,
}

/// Static analysis verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeAnalysis {
    /// Findings, one line each.
    #[serde(default)]
    pub issues: Vec<String>,
    /// Complexity class, e.g. `O(n)`.
    pub complexity: String,
    /// Overall score.
    pub score: f64,
    /// Detected language.
    pub language: String,
    /// Line count.
    pub lines: u64,
}

/// The signed-in user as returned by the identity endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    /// User id; used as the candidate id of the report.
    pub id: i64,
    /// Any further profile fields, passed through untouched.
    #[serde(flatten)]
    pub profile: serde_json::Map<String, serde_json::Value>,
}

/// Body of the report endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    /// Candidate (user) id.
    pub candidate_id: i64,
    /// Assessment id.
    pub assessment_id: i64,
    /// Final code.
    pub code_snapshot: String,
    /// Client-side event journal.
    pub browser_logs: Vec<BrowserLogEntry>,
    /// Interview transcript, empty for coding assessments.
    pub audio_transcript: String,
}

// =============================================================================
// AssessmentBackend Trait
// =============================================================================

/// Request/response collaborators used by a session.
#[async_trait]
pub trait AssessmentBackend: Send + Sync {
    /// Runs code in the external sandbox.
    async fn execute_code(&self, submission: &CodeSubmission)
        -> Result<ExecutionResult, BackendError>;

    /// Analyzes code.
    async fn analyze_code(&self, submission: &CodeSubmission) -> Result<CodeAnalysis, BackendError>;

    /// Resolves the signed-in user.
    async fn current_user(&self) -> Result<CurrentUser, BackendError>;

    /// Submits the final report payload.
    async fn generate_report(&self, report: &ReportRequest) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_request_wire_names() {
        let report = ReportRequest {
            candidate_id: 11,
            assessment_id: 4,
            code_snapshot: "print(1)".to_string(),
            browser_logs: vec![BrowserLogEntry {
                event: "TAB_SWITCH".to_string(),
                time: "2026-03-01T09:30:00.000Z".to_string(),
            }],
            audio_transcript: String::new(),
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["candidateId"], 11);
        assert_eq!(json["assessmentId"], 4);
        assert_eq!(json["codeSnapshot"], "print(1)");
        assert_eq!(json["browserLogs"][0]["event"], "TAB_SWITCH");
        assert_eq!(json["audioTranscript"], "");
    }

    #[test]
    fn test_current_user_keeps_extra_fields() {
        let user: CurrentUser =
            serde_json::from_str(r#"{"id": 3, "email": "a@b.c", "role": "candidate"}"#).unwrap();
        assert_eq!(user.id, 3);
        assert_eq!(user.profile["role"], "candidate");
    }

    #[test]
    fn test_execution_result_tolerates_missing_streams() {
        let result: ExecutionResult = serde_json::from_str(r#"{"stdout": "ok"}"#).unwrap();
        assert_eq!(result.stdout, "ok");
        assert!(result.stderr.is_empty());
    }
}
