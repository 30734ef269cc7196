//! In-process document used by the replay harness and tests.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::trace;

use super::{
    ClipboardOp, DispatchOutcome, Document, FullscreenError, Signal, SignalBus, SurfaceId,
    VisibilityState,
};

/// A [`Document`] whose state is driven programmatically.
///
/// Each state-changing method updates the document first and then dispatches
/// the matching signal, mirroring the order a browser uses.
#[derive(Debug)]
pub struct SimulatedDocument {
    hidden: AtomicBool,
    fullscreen: AtomicBool,
    accept_fullscreen_requests: AtomicBool,
    bus: SignalBus,
}

impl Default for SimulatedDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDocument {
    /// Creates a visible, non-fullscreen document that accepts fullscreen
    /// requests.
    #[must_use]
    pub fn new() -> Self {
        Self {
            hidden: AtomicBool::new(false),
            fullscreen: AtomicBool::new(false),
            accept_fullscreen_requests: AtomicBool::new(true),
            bus: SignalBus::new(),
        }
    }

    /// Creates a document that starts in fullscreen.
    #[must_use]
    pub fn in_fullscreen() -> Self {
        let document = Self::new();
        document.fullscreen.store(true, Ordering::Release);
        document
    }

    /// Controls whether [`Document::request_fullscreen`] succeeds.
    pub fn set_accept_fullscreen_requests(&self, accept: bool) {
        self.accept_fullscreen_requests
            .store(accept, Ordering::Release);
    }

    /// The page becomes hidden.
    pub fn hide(&self) -> DispatchOutcome {
        self.hidden.store(true, Ordering::Release);
        self.bus.dispatch(Signal::VisibilityChange)
    }

    /// The page becomes visible.
    pub fn show(&self) -> DispatchOutcome {
        self.hidden.store(false, Ordering::Release);
        self.bus.dispatch(Signal::VisibilityChange)
    }

    /// The user leaves fullscreen (Esc, F11, window manager).
    pub fn exit_fullscreen(&self) -> DispatchOutcome {
        self.fullscreen.store(false, Ordering::Release);
        self.bus.dispatch(Signal::FullscreenChange)
    }

    /// Fullscreen is entered by means outside the monitor.
    pub fn enter_fullscreen(&self) -> DispatchOutcome {
        self.fullscreen.store(true, Ordering::Release);
        self.bus.dispatch(Signal::FullscreenChange)
    }

    /// A clipboard operation aimed at `target`.
    pub fn clipboard(&self, op: ClipboardOp, target: &SurfaceId) -> DispatchOutcome {
        self.bus.dispatch(Signal::Clipboard {
            op,
            target: target.clone(),
        })
    }

    /// A context-menu request on `target`.
    pub fn context_menu(&self, target: &SurfaceId) -> DispatchOutcome {
        self.bus.dispatch(Signal::ContextMenu {
            target: target.clone(),
        })
    }
}

#[async_trait]
impl Document for SimulatedDocument {
    fn visibility_state(&self) -> VisibilityState {
        if self.hidden.load(Ordering::Acquire) {
            VisibilityState::Hidden
        } else {
            VisibilityState::Visible
        }
    }

    fn has_fullscreen_element(&self) -> bool {
        self.fullscreen.load(Ordering::Acquire)
    }

    fn signals(&self) -> &SignalBus {
        &self.bus
    }

    async fn request_fullscreen(&self, target: &SurfaceId) -> Result<(), FullscreenError> {
        if !self.accept_fullscreen_requests.load(Ordering::Acquire) {
            return Err(FullscreenError::Rejected(
                "request was not triggered by user activation".to_string(),
            ));
        }
        trace!(target = %target, "entering fullscreen");
        self.enter_fullscreen();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_changes_before_dispatch() {
        let document = SimulatedDocument::new();
        assert_eq!(document.visibility_state(), VisibilityState::Visible);

        document.hide();
        assert_eq!(document.visibility_state(), VisibilityState::Hidden);

        document.show();
        assert_eq!(document.visibility_state(), VisibilityState::Visible);
    }

    #[tokio::test]
    async fn test_rejected_request_leaves_state_untouched() {
        let document = SimulatedDocument::new();
        document.set_accept_fullscreen_requests(false);

        let result = document.request_fullscreen(&SurfaceId::new("page")).await;

        assert!(matches!(result, Err(FullscreenError::Rejected(_))));
        assert!(!document.has_fullscreen_element());
    }

    #[tokio::test]
    async fn test_accepted_request_enters_fullscreen() {
        let document = SimulatedDocument::new();

        document
            .request_fullscreen(&SurfaceId::new("page"))
            .await
            .unwrap();

        assert!(document.has_fullscreen_element());
    }
}
