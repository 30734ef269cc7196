//! Tab / window visibility watcher.

use std::sync::Arc;

use tracing::debug;

use super::ViolationReporter;
use crate::dom::{Document, DocumentEvent, ListenerGuard, Topic, VisibilityState};
use crate::event::EventKind;

/// Emits `TAB_SWITCH` each time the document becomes hidden.
///
/// Becoming visible again is not a violation, so an away-and-back trip counts
/// once. The watcher keeps no state besides its subscription.
#[derive(Debug)]
pub struct VisibilityWatcher {
    _subscription: ListenerGuard,
}

impl VisibilityWatcher {
    /// Subscribes to `document`'s visibility changes.
    #[must_use]
    pub fn attach(document: &Arc<dyn Document>, reporter: ViolationReporter) -> Self {
        let weak = Arc::downgrade(document);
        let subscription = document.signals().subscribe(
            Topic::Visibility,
            Arc::new(move |_event: &DocumentEvent| {
                let Some(document) = weak.upgrade() else {
                    return;
                };
                if document.visibility_state() != VisibilityState::Hidden {
                    return;
                }
                let outcome = reporter.report(EventKind::TabSwitch);
                debug!(?outcome, "document hidden");
            }),
        );
        Self {
            _subscription: subscription,
        }
    }

    /// Unsubscribes.
    pub fn detach(self) {
        drop(self);
    }
}
