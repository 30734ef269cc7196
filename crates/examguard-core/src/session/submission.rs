//! Live submission state.

use std::sync::{Arc, Mutex, PoisonError};

use crate::backend::CodeSubmission;
use crate::event::{BrowserLogEntry, EventJournal};

/// Language assumed until the host says otherwise.
pub const DEFAULT_LANGUAGE: &str = "python";

#[derive(Debug, Clone, Default)]
struct DraftState {
    code: String,
    language: String,
    transcript: String,
}

/// What the candidate has produced so far.
///
/// The host updates the code as the candidate types; the session reads it
/// when running code and when packaging the final report. The event journal
/// is shared with the violation reporter so the report carries every
/// violation observed during the session.
#[derive(Debug)]
pub struct SubmissionDraft {
    state: Mutex<DraftState>,
    journal: Arc<EventJournal>,
}

/// Point-in-time copy of a [`SubmissionDraft`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftSnapshot {
    /// Source text.
    pub code: String,
    /// Language identifier.
    pub language: String,
    /// Interview transcript, empty for coding assessments.
    pub transcript: String,
    /// Client-side event log.
    pub browser_logs: Vec<BrowserLogEntry>,
}

impl SubmissionDraft {
    /// Creates an empty draft in [`DEFAULT_LANGUAGE`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_language(DEFAULT_LANGUAGE)
    }

    /// Creates an empty draft in `language`.
    #[must_use]
    pub fn with_language(language: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(DraftState {
                language: language.into(),
                ..DraftState::default()
            }),
            journal: Arc::new(EventJournal::new()),
        }
    }

    /// Replaces the code.
    pub fn set_code(&self, code: impl Into<String>) {
        self.lock().code = code.into();
    }

    /// Changes the language.
    pub fn set_language(&self, language: impl Into<String>) {
        self.lock().language = language.into();
    }

    /// Replaces the transcript.
    pub fn set_transcript(&self, transcript: impl Into<String>) {
        self.lock().transcript = transcript.into();
    }

    /// Current code.
    #[must_use]
    pub fn code(&self) -> String {
        self.lock().code.clone()
    }

    /// Current language.
    #[must_use]
    pub fn language(&self) -> String {
        self.lock().language.clone()
    }

    /// Journal of violations recorded for this draft.
    #[must_use]
    pub const fn journal(&self) -> &Arc<EventJournal> {
        &self.journal
    }

    /// Request body for the execute and analyze endpoints.
    #[must_use]
    pub fn to_code_submission(&self, assessment_id: i64) -> CodeSubmission {
        let state = self.lock();
        CodeSubmission {
            assessment_id,
            language: state.language.clone(),
            code: state.code.clone(),
        }
    }

    /// Copies everything, journal included.
    #[must_use]
    pub fn snapshot(&self) -> DraftSnapshot {
        let state = self.lock().clone();
        DraftSnapshot {
            code: state.code,
            language: state.language,
            transcript: state.transcript,
            browser_logs: self.journal.snapshot(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DraftState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SubmissionDraft {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, ViolationEvent};

    #[test]
    fn test_new_draft_is_empty_python() {
        let draft = SubmissionDraft::new();
        let snapshot = draft.snapshot();

        assert!(snapshot.code.is_empty());
        assert_eq!(snapshot.language, "python");
        assert!(snapshot.browser_logs.is_empty());
    }

    #[test]
    fn test_snapshot_reflects_updates_and_journal() {
        let draft = SubmissionDraft::with_language("java");
        draft.set_code("class A {}");
        draft.set_transcript("hello");
        draft
            .journal()
            .record(&ViolationEvent::now(EventKind::PasteAttempt, Some(2)));

        let snapshot = draft.snapshot();
        assert_eq!(snapshot.code, "class A {}");
        assert_eq!(snapshot.language, "java");
        assert_eq!(snapshot.transcript, "hello");
        assert_eq!(snapshot.browser_logs.len(), 1);
        assert_eq!(snapshot.browser_logs[0].event, "PASTE_ATTEMPT");
    }

    #[test]
    fn test_code_submission_uses_current_language() {
        let draft = SubmissionDraft::new();
        draft.set_code("console.log(1)");
        draft.set_language("javascript");

        let submission = draft.to_code_submission(9);
        assert_eq!(submission.assessment_id, 9);
        assert_eq!(submission.language, "javascript");
        assert_eq!(submission.code, "console.log(1)");
    }
}
