//! Clipboard and context-menu interception.

use std::sync::Arc;

use tracing::info;

use super::ViolationReporter;
use crate::dom::{ClipboardOp, Document, DocumentEvent, ListenerGuard, Signal, SurfaceId, Topic};
use crate::event::EventKind;

/// Blocks copy, cut, paste and the context menu on one surface.
///
/// The native action is cancelled before anything else happens, then the
/// attempt is reported. Every attempt is a full violation; there is no
/// debouncing. Input aimed at other surfaces is left alone.
#[derive(Debug)]
pub struct InputGuard {
    surface: SurfaceId,
    _subscription: ListenerGuard,
}

impl InputGuard {
    /// Starts intercepting input on `surface`.
    #[must_use]
    pub fn attach(
        document: &Arc<dyn Document>,
        surface: SurfaceId,
        reporter: ViolationReporter,
    ) -> Self {
        let monitored = surface.clone();
        let subscription = document.signals().subscribe(
            Topic::Input,
            Arc::new(move |event: &DocumentEvent| {
                let Some(kind) = intercepted_kind(event.signal(), &monitored) else {
                    return;
                };
                event.prevent_default();
                let outcome = reporter.report(kind);
                info!(kind = %kind, surface = %monitored, ?outcome, "blocked input");
            }),
        );
        Self {
            surface,
            _subscription: subscription,
        }
    }

    /// The surface being guarded.
    #[must_use]
    pub const fn surface(&self) -> &SurfaceId {
        &self.surface
    }

    /// Unsubscribes.
    pub fn detach(self) {
        drop(self);
    }
}

fn intercepted_kind(signal: &Signal, monitored: &SurfaceId) -> Option<EventKind> {
    match signal {
        Signal::Clipboard { op, target } if target == monitored => Some(match op {
            ClipboardOp::Copy => EventKind::CopyAttempt,
            ClipboardOp::Cut => EventKind::CutAttempt,
            ClipboardOp::Paste => EventKind::PasteAttempt,
        }),
        Signal::ContextMenu { target } if target == monitored => Some(EventKind::ContextMenu),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::SimulatedDocument;
    use crate::guard::test_support::reporter;

    fn setup() -> (Arc<SimulatedDocument>, Arc<dyn Document>, SurfaceId) {
        let simulated = Arc::new(SimulatedDocument::new());
        let document = Arc::clone(&simulated) as Arc<dyn Document>;
        (simulated, document, SurfaceId::new("editor"))
    }

    #[test]
    fn test_each_operation_maps_to_its_kind() {
        let (simulated, document, editor) = setup();
        let (reporter, sink) = reporter(100);
        let _guard = InputGuard::attach(&document, editor.clone(), reporter);

        assert!(simulated.clipboard(ClipboardOp::Copy, &editor).default_prevented);
        assert!(simulated.clipboard(ClipboardOp::Cut, &editor).default_prevented);
        assert!(simulated.clipboard(ClipboardOp::Paste, &editor).default_prevented);
        assert!(simulated.context_menu(&editor).default_prevented);

        let kinds: Vec<_> = sink.events().iter().map(|event| event.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::CopyAttempt,
                EventKind::CutAttempt,
                EventKind::PasteAttempt,
                EventKind::ContextMenu,
            ]
        );
    }

    #[test]
    fn test_repeated_attempts_are_not_debounced() {
        let (simulated, document, editor) = setup();
        let (reporter, sink) = reporter(100);
        let escalator = Arc::clone(reporter.escalator());
        let _guard = InputGuard::attach(&document, editor.clone(), reporter);

        for _ in 0..5 {
            simulated.clipboard(ClipboardOp::Paste, &editor);
        }

        assert_eq!(sink.count_of(EventKind::PasteAttempt), 5);
        assert_eq!(escalator.state().warning_count, 5);
    }

    #[test]
    fn test_other_surfaces_pass_through() {
        let (simulated, document, editor) = setup();
        let (reporter, sink) = reporter(100);
        let _guard = InputGuard::attach(&document, editor, reporter);

        let outcome = simulated.clipboard(ClipboardOp::Copy, &SurfaceId::new("problem-statement"));

        assert!(!outcome.default_prevented);
        assert!(sink.is_empty());
    }
}
