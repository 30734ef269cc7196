//! Finalize latch and error types.
//!
//! ```text
//!          finalize()            ok
//!   Idle ─────────────► Running ─────► Completed
//!                         │  ▲
//!                   error │  │ retry_finalize()
//!                         ▼  │
//!                        Failed
//! ```
//!
//! Only `Idle → Running` and `Failed → Running` are caller-initiated, and
//! both are compare-and-set, so at most one pipeline runs at a time and a
//! completed submission is never repeated.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

use crate::backend::BackendError;

/// What asked for the submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeTrigger {
    /// The escalator crossed its threshold.
    Automatic,
    /// The candidate pressed submit.
    Manual,
}

impl fmt::Display for FinalizeTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Automatic => write!(f, "automatic"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Finalize pipeline step, used to label failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeStep {
    /// Best-effort code analysis.
    Analyze,
    /// Candidate id lookup.
    Identity,
    /// Report submission.
    Report,
}

impl fmt::Display for FinalizeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Analyze => write!(f, "analyze"),
            Self::Identity => write!(f, "identity"),
            Self::Report => write!(f, "report"),
        }
    }
}

/// Finalize latch state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeStatus {
    /// Nothing submitted yet.
    Idle,
    /// A pipeline is in flight.
    Running,
    /// The report was accepted.
    Completed,
    /// The last attempt failed; [`retry_finalize`](super::AssessmentSession::retry_finalize) may run it again.
    Failed,
}

impl FinalizeStatus {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Running => 1,
            Self::Completed => 2,
            Self::Failed => 3,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Completed,
            _ => Self::Failed,
        }
    }

    /// Whether no pipeline is in flight and none will start on its own.
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for FinalizeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Running => write!(f, "Running"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Result of a finalize call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// This call ran the pipeline and the report was accepted.
    Submitted {
        /// Candidate id the report was filed under.
        candidate_id: i64,
        /// What asked for the submission.
        trigger: FinalizeTrigger,
    },
    /// Another call is running the pipeline, or it already completed.
    AlreadyHandled,
}

/// Finalize failures. The latch stays `Failed` until a retry succeeds.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FinalizeError {
    /// A collaborator call returned an error.
    #[error("{step} step failed: {source}")]
    Backend {
        /// Failing step.
        step: FinalizeStep,
        /// Underlying error.
        #[source]
        source: BackendError,
    },

    /// A collaborator call did not answer in time.
    #[error("{step} step timed out after {after:?}")]
    Timeout {
        /// Failing step.
        step: FinalizeStep,
        /// Configured per-step limit.
        after: Duration,
    },

    /// Retry requested before any submission was attempted.
    #[error("no failed submission to retry")]
    NothingToRetry,

    /// The session was ended before anything was submitted.
    #[error("session has ended")]
    SessionEnded,
}

/// Atomic `Idle → Running → Completed | Failed` latch.
///
/// Transitions are published on a watch channel so callers can wait for an
/// automatically triggered pipeline to settle.
#[derive(Debug)]
pub struct FinalizeLatch {
    state: AtomicU8,
    status: watch::Sender<FinalizeStatus>,
}

impl FinalizeLatch {
    /// Creates an idle latch.
    #[must_use]
    pub fn new() -> Self {
        let (status, _) = watch::channel(FinalizeStatus::Idle);
        Self {
            state: AtomicU8::new(FinalizeStatus::Idle.as_u8()),
            status,
        }
    }

    /// Current state.
    #[must_use]
    pub fn status(&self) -> FinalizeStatus {
        FinalizeStatus::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Observes transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<FinalizeStatus> {
        self.status.subscribe()
    }

    /// `Idle → Running`. Returns `false` if any pipeline already started.
    pub fn try_begin(&self) -> bool {
        self.transition(FinalizeStatus::Idle, FinalizeStatus::Running)
    }

    /// `Failed → Running`. Returns the observed state on failure.
    pub fn try_retry(&self) -> Result<(), FinalizeStatus> {
        if self.transition(FinalizeStatus::Failed, FinalizeStatus::Running) {
            Ok(())
        } else {
            Err(self.status())
        }
    }

    /// `Running → Completed`.
    pub fn complete(&self) {
        self.transition(FinalizeStatus::Running, FinalizeStatus::Completed);
    }

    /// `Running → Failed`.
    pub fn fail(&self) {
        self.transition(FinalizeStatus::Running, FinalizeStatus::Failed);
    }

    fn transition(&self, from: FinalizeStatus, to: FinalizeStatus) -> bool {
        let swapped = self
            .state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if swapped {
            self.status.send_replace(to);
        }
        swapped
    }
}

impl Default for FinalizeLatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_first_begin_wins() {
        let latch = FinalizeLatch::new();

        assert!(latch.try_begin());
        assert!(!latch.try_begin());
        assert_eq!(latch.status(), FinalizeStatus::Running);
    }

    #[test]
    fn test_retry_only_from_failed() {
        let latch = FinalizeLatch::new();
        assert_eq!(latch.try_retry(), Err(FinalizeStatus::Idle));

        assert!(latch.try_begin());
        assert_eq!(latch.try_retry(), Err(FinalizeStatus::Running));
        latch.fail();
        assert!(!latch.try_begin());
        assert_eq!(latch.try_retry(), Ok(()));
        latch.complete();

        assert_eq!(latch.status(), FinalizeStatus::Completed);
        assert_eq!(latch.try_retry(), Err(FinalizeStatus::Completed));
    }

    #[test]
    fn test_completion_requires_running() {
        let latch = FinalizeLatch::new();
        latch.complete();
        assert_eq!(latch.status(), FinalizeStatus::Idle);
    }

    #[test]
    fn test_concurrent_begin_admits_one() {
        let latch = Arc::new(FinalizeLatch::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let latch = Arc::clone(&latch);
                std::thread::spawn(move || latch.try_begin())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_transitions_are_published() {
        let latch = FinalizeLatch::new();
        let mut status = latch.subscribe();

        latch.try_begin();
        latch.fail();

        assert!(status.has_changed().unwrap());
        assert_eq!(*status.borrow_and_update(), FinalizeStatus::Failed);
        assert!(FinalizeStatus::Failed.is_settled());
        assert!(!FinalizeStatus::Running.is_settled());
    }
}
