//! Browser-signal guards.
//!
//! Each guard subscribes to one topic of a [`Document`](crate::dom::Document)
//! and turns qualifying signals into violation events through a shared
//! [`ViolationReporter`]:
//!
//! - [`VisibilityWatcher`]: page hidden → `TAB_SWITCH`
//! - [`FullscreenGuard`]: fullscreen lost → `FULLSCREEN_EXIT`
//! - [`InputGuard`]: clipboard / context menu on the monitored surface →
//!   `COPY_ATTEMPT`, `CUT_ATTEMPT`, `PASTE_ATTEMPT`, `CONTEXT_MENU`
//!
//! Guards hold their subscriptions as [`ListenerGuard`](crate::dom::ListenerGuard)
//! values; dropping a guard detaches it.

mod fullscreen;
mod input;
mod visibility;

use std::sync::Arc;

pub use fullscreen::FullscreenGuard;
pub(crate) use fullscreen::request_fullscreen_on;
pub use input::InputGuard;
pub use visibility::VisibilityWatcher;

use crate::escalation::{EscalationOutcome, WarningEscalator};
use crate::event::{EventJournal, EventKind, ViolationEvent};
use crate::telemetry::EventSink;

/// Fan-out for one observed violation: journal, telemetry, escalator.
#[derive(Clone)]
pub struct ViolationReporter {
    assessment_id: Option<i64>,
    sink: Arc<dyn EventSink>,
    escalator: Arc<WarningEscalator>,
    journal: Arc<EventJournal>,
}

impl ViolationReporter {
    /// Creates a reporter.
    #[must_use]
    pub fn new(
        assessment_id: Option<i64>,
        sink: Arc<dyn EventSink>,
        escalator: Arc<WarningEscalator>,
        journal: Arc<EventJournal>,
    ) -> Self {
        Self {
            assessment_id,
            sink,
            escalator,
            journal,
        }
    }

    /// Records a violation of `kind` that happened now.
    ///
    /// The event goes to the journal and the sink before the escalator sees
    /// it, so the event that triggers escalation is always logged.
    pub fn report(&self, kind: EventKind) -> EscalationOutcome {
        let event = ViolationEvent::now(kind, self.assessment_id);
        self.journal.record(&event);
        self.sink.send(event);
        self.escalator.observe(kind)
    }

    /// Returns the escalator this reporter feeds.
    #[must_use]
    pub const fn escalator(&self) -> &Arc<WarningEscalator> {
        &self.escalator
    }
}

impl std::fmt::Debug for ViolationReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViolationReporter")
            .field("assessment_id", &self.assessment_id)
            .field("escalator", &self.escalator)
            .finish_non_exhaustive()
    }
}
