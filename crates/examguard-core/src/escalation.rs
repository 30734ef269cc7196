//! Warning counter and one-shot escalation.
//!
//! The [`WarningEscalator`] counts violation events and flips exactly once from
//! `Normal` to `Escalated` when the running count first reaches the configured
//! threshold.
//!
//! ```text
//!            violation (count < max)
//!            ┌──────────┐
//!            │          ▼
//!        ┌────────┐  count reaches max   ┌───────────┐
//!        │ Normal │ ───────────────────► │ Escalated │ ◄── violation (count only)
//!        └────────┘   (callback, once)   └───────────┘
//! ```
//!
//! Counting and latching are atomic, so concurrent observers on a threaded
//! host still fire the escalation callback exactly once. The transition is
//! committed before the callback runs; whatever the callback does (for
//! example a failing auto-submit) cannot roll it back.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use thiserror::Error;
use tracing::{debug, info};

use crate::event::EventKind;

/// Default number of violations tolerated before escalation.
pub const DEFAULT_MAX_WARNINGS: u32 = 3;

/// Errors raised when building an escalator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EscalationError {
    /// The threshold must be at least one.
    #[error("max_warnings must be a positive integer, got {0}")]
    InvalidThreshold(u32),
}

/// Escalator phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationPhase {
    /// Violations are being tolerated.
    Normal,
    /// Threshold crossed; terminal for the session.
    Escalated,
}

impl fmt::Display for EscalationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "Normal"),
            Self::Escalated => write!(f, "Escalated"),
        }
    }
}

/// Point-in-time view of the escalator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationState {
    /// Violations observed so far.
    pub warning_count: u32,
    /// Whether the escalation transition has happened.
    pub auto_submitted: bool,
}

impl EscalationState {
    /// Returns the phase implied by this state.
    #[must_use]
    pub const fn phase(&self) -> EscalationPhase {
        if self.auto_submitted {
            EscalationPhase::Escalated
        } else {
            EscalationPhase::Normal
        }
    }
}

/// Result of feeding one event to the escalator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationOutcome {
    /// Not a violation kind; nothing changed.
    Ignored,
    /// Counted without crossing the threshold (or after it was crossed).
    Counted {
        /// Count after this event.
        warning_count: u32,
    },
    /// This event crossed the threshold and fired the callback.
    Escalated {
        /// Count after this event.
        warning_count: u32,
    },
}

/// Callback invoked once on escalation.
pub type EscalationCallback = Box<dyn Fn(EscalationState) + Send + Sync>;

/// Counter/threshold state machine with a one-shot escalation latch.
pub struct WarningEscalator {
    max_warnings: u32,
    warning_count: AtomicU32,
    escalated: AtomicBool,
    on_escalate: Option<EscalationCallback>,
}

impl WarningEscalator {
    /// Creates an escalator without a callback.
    ///
    /// # Errors
    ///
    /// Returns [`EscalationError::InvalidThreshold`] if `max_warnings` is zero.
    pub fn new(max_warnings: u32) -> Result<Self, EscalationError> {
        if max_warnings == 0 {
            return Err(EscalationError::InvalidThreshold(max_warnings));
        }
        Ok(Self {
            max_warnings,
            warning_count: AtomicU32::new(0),
            escalated: AtomicBool::new(false),
            on_escalate: None,
        })
    }

    /// Sets the escalation callback.
    #[must_use]
    pub fn with_callback(mut self, callback: EscalationCallback) -> Self {
        self.on_escalate = Some(callback);
        self
    }

    /// Returns the configured threshold.
    #[must_use]
    pub const fn max_warnings(&self) -> u32 {
        self.max_warnings
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> EscalationState {
        EscalationState {
            warning_count: self.warning_count.load(Ordering::Acquire),
            auto_submitted: self.escalated.load(Ordering::Acquire),
        }
    }

    /// Returns whether the threshold has been crossed.
    #[must_use]
    pub fn is_escalated(&self) -> bool {
        self.escalated.load(Ordering::Acquire)
    }

    /// Feeds one event.
    ///
    /// Snapshot events are ignored. Every other kind increments the counter;
    /// the event that moves the counter from below the threshold to the
    /// threshold is the only one that can escalate.
    pub fn observe(&self, kind: EventKind) -> EscalationOutcome {
        if !kind.is_violation() {
            return EscalationOutcome::Ignored;
        }

        let previous = self
            .warning_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some(count.saturating_add(1))
            })
            .unwrap_or_else(|count| count);
        let warning_count = previous.saturating_add(1);

        let crossed = previous < self.max_warnings && warning_count >= self.max_warnings;
        if crossed
            && self
                .escalated
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            info!(
                kind = %kind,
                warning_count,
                max_warnings = self.max_warnings,
                "warning threshold reached, escalating"
            );
            if let Some(callback) = &self.on_escalate {
                callback(EscalationState {
                    warning_count,
                    auto_submitted: true,
                });
            }
            return EscalationOutcome::Escalated { warning_count };
        }

        debug!(kind = %kind, warning_count, "violation counted");
        EscalationOutcome::Counted { warning_count }
    }
}

impl fmt::Debug for WarningEscalator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarningEscalator")
            .field("max_warnings", &self.max_warnings)
            .field("state", &self.state())
            .field("has_callback", &self.on_escalate.is_some())
            .finish()
    }
}
