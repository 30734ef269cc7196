//! Fullscreen compliance guard.

use std::sync::{Arc, Weak};

use tokio::sync::watch;
use tracing::{debug, info};

use super::ViolationReporter;
use crate::dom::{Document, DocumentEvent, ListenerGuard, SurfaceId, Topic};
use crate::event::EventKind;

/// Tracks whether the document is in fullscreen and reports every exit.
///
/// Compliance is recomputed from the document at attach time and on every
/// fullscreen-change signal. Each change that leaves the document without a
/// fullscreen element is a `FULLSCREEN_EXIT` violation; entering fullscreen is
/// the remedy and emits nothing.
///
/// The host renders a blocking overlay while [`FullscreenGuard::is_compliant`]
/// is `false`; [`FullscreenGuard::compliance`] gives a watch channel for that.
#[derive(Debug)]
pub struct FullscreenGuard {
    document: Weak<dyn Document>,
    compliance: Arc<watch::Sender<bool>>,
    _subscription: ListenerGuard,
}

impl FullscreenGuard {
    /// Reads the current fullscreen state and subscribes to changes.
    #[must_use]
    pub fn attach(document: &Arc<dyn Document>, reporter: ViolationReporter) -> Self {
        let (compliance, _) = watch::channel(document.has_fullscreen_element());
        let compliance = Arc::new(compliance);

        let weak = Arc::downgrade(document);
        let listener_compliance = Arc::clone(&compliance);
        let subscription = document.signals().subscribe(
            Topic::Fullscreen,
            Arc::new(move |_event: &DocumentEvent| {
                let Some(document) = weak.upgrade() else {
                    return;
                };
                let in_fullscreen = document.has_fullscreen_element();
                listener_compliance.send_replace(in_fullscreen);
                if in_fullscreen {
                    debug!("fullscreen restored");
                    return;
                }
                let outcome = reporter.report(EventKind::FullscreenExit);
                info!(?outcome, "fullscreen exited");
            }),
        );

        Self {
            document: Arc::downgrade(document),
            compliance,
            _subscription: subscription,
        }
    }

    /// Whether the document currently satisfies the fullscreen policy.
    #[must_use]
    pub fn is_compliant(&self) -> bool {
        *self.compliance.borrow()
    }

    /// Returns a receiver that observes every compliance change.
    #[must_use]
    pub fn compliance(&self) -> watch::Receiver<bool> {
        self.compliance.subscribe()
    }

    /// Asks the host to put `target` back in fullscreen.
    ///
    /// A rejection is logged and swallowed; compliance only changes when the
    /// host later dispatches a fullscreen-change signal.
    pub async fn request_fullscreen(&self, target: &SurfaceId) {
        request_fullscreen_on(&self.document, target).await;
    }

    /// Unsubscribes.
    pub fn detach(self) {
        drop(self);
    }
}

/// Best-effort fullscreen request against a document that may be gone.
pub(crate) async fn request_fullscreen_on(document: &Weak<dyn Document>, target: &SurfaceId) {
    let Some(document) = document.upgrade() else {
        return;
    };
    if let Err(e) = document.request_fullscreen(target).await {
        debug!(target = %target, error = %e, "fullscreen request rejected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::SimulatedDocument;
    use crate::guard::test_support::reporter;

    fn setup(start_fullscreen: bool) -> (Arc<SimulatedDocument>, Arc<dyn Document>) {
        let simulated = Arc::new(if start_fullscreen {
            SimulatedDocument::in_fullscreen()
        } else {
            SimulatedDocument::new()
        });
        let document = Arc::clone(&simulated) as Arc<dyn Document>;
        (simulated, document)
    }

    #[test]
    fn test_initial_state_is_read_at_attach() {
        let (_simulated, document) = setup(true);
        let (reporter, sink) = reporter(10);

        let guard = FullscreenGuard::attach(&document, reporter);

        assert!(guard.is_compliant());
        assert!(sink.is_empty());
    }

    #[test]
    fn test_exit_reports_and_reentry_restores() {
        let (simulated, document) = setup(true);
        let (reporter, sink) = reporter(10);
        let guard = FullscreenGuard::attach(&document, reporter);

        simulated.exit_fullscreen();
        assert!(!guard.is_compliant());
        assert_eq!(sink.count_of(EventKind::FullscreenExit), 1);

        simulated.enter_fullscreen();
        assert!(guard.is_compliant());
        assert_eq!(sink.count_of(EventKind::FullscreenExit), 1);
    }

    #[tokio::test]
    async fn test_exit_rejected_request_exit_counts_twice() {
        let (simulated, document) = setup(true);
        let (reporter, sink) = reporter(10);
        let escalator = Arc::clone(reporter.escalator());
        let guard = FullscreenGuard::attach(&document, reporter);

        simulated.exit_fullscreen();
        simulated.set_accept_fullscreen_requests(false);
        guard.request_fullscreen(&SurfaceId::new("page")).await;
        assert!(!guard.is_compliant());
        simulated.exit_fullscreen();

        assert_eq!(sink.count_of(EventKind::FullscreenExit), 2);
        assert_eq!(escalator.state().warning_count, 2);
    }

    #[tokio::test]
    async fn test_accepted_request_becomes_compliant() {
        let (_simulated, document) = setup(false);
        let (reporter, _sink) = reporter(10);
        let guard = FullscreenGuard::attach(&document, reporter);
        let mut compliance = guard.compliance();
        assert!(!guard.is_compliant());

        guard.request_fullscreen(&SurfaceId::new("page")).await;

        assert!(guard.is_compliant());
        assert!(compliance.has_changed().unwrap());
        assert!(*compliance.borrow_and_update());
    }
}
