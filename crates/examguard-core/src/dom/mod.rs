//! Host document abstraction.
//!
//! The monitor never touches a real DOM. A host (wasm shim, webview bridge,
//! replay harness) implements [`Document`] and forwards native signals into
//! the document's [`SignalBus`]. Listeners run synchronously on the
//! dispatching thread, in registration order, so the order in which the host
//! dispatches is the order in which violations are processed.
//!
//! Subscriptions are RAII: dropping a [`ListenerGuard`] removes the listener.

mod simulated;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use thiserror::Error;

pub use simulated::SimulatedDocument;

// =============================================================================
// Signals
// =============================================================================

/// Document visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityState {
    /// The page is visible.
    Visible,
    /// The page is hidden (another tab, minimised window, locked screen).
    Hidden,
}

/// Identifier of a monitored region such as the code editor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SurfaceId(String);

impl SurfaceId {
    /// Creates a surface identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Native clipboard operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipboardOp {
    /// `copy`
    Copy,
    /// `cut`
    Cut,
    /// `paste`
    Paste,
}

/// A native signal forwarded by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// `visibilitychange`; read the state from [`Document::visibility_state`].
    VisibilityChange,
    /// `fullscreenchange`; read the state from
    /// [`Document::has_fullscreen_element`].
    FullscreenChange,
    /// A clipboard operation on `target`.
    Clipboard {
        /// Operation attempted.
        op: ClipboardOp,
        /// Surface the operation was aimed at.
        target: SurfaceId,
    },
    /// `contextmenu` on `target`.
    ContextMenu {
        /// Surface the menu was requested on.
        target: SurfaceId,
    },
}

impl Signal {
    /// Returns the topic this signal is delivered on.
    #[must_use]
    pub const fn topic(&self) -> Topic {
        match self {
            Self::VisibilityChange => Topic::Visibility,
            Self::FullscreenChange => Topic::Fullscreen,
            Self::Clipboard { .. } | Self::ContextMenu { .. } => Topic::Input,
        }
    }
}

/// Subscription topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Visibility changes.
    Visibility,
    /// Fullscreen changes.
    Fullscreen,
    /// Clipboard and context-menu operations.
    Input,
}

/// A dispatched signal together with its cancellation flag.
#[derive(Debug)]
pub struct DocumentEvent {
    signal: Signal,
    default_prevented: AtomicBool,
}

impl DocumentEvent {
    fn new(signal: Signal) -> Self {
        Self {
            signal,
            default_prevented: AtomicBool::new(false),
        }
    }

    /// Returns the signal.
    #[must_use]
    pub const fn signal(&self) -> &Signal {
        &self.signal
    }

    /// Suppresses the native action.
    pub fn prevent_default(&self) {
        self.default_prevented.store(true, Ordering::Release);
    }

    /// Whether a listener suppressed the native action.
    #[must_use]
    pub fn default_prevented(&self) -> bool {
        self.default_prevented.load(Ordering::Acquire)
    }
}

/// What the host should do with the native action after dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Whether the native action must be cancelled.
    pub default_prevented: bool,
    /// How many listeners saw the signal.
    pub delivered: usize,
}

// =============================================================================
// SignalBus
// =============================================================================

/// Listener callback.
pub type Listener = Arc<dyn Fn(&DocumentEvent) + Send + Sync>;

struct Registration {
    topic: Topic,
    listener: Listener,
}

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    listeners: RwLock<BTreeMap<u64, Registration>>,
}

/// Per-document listener registry.
#[derive(Default, Clone)]
pub struct SignalBus {
    registry: Arc<Registry>,
}

impl SignalBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` for `topic`. The listener stays registered until
    /// the returned guard is released or dropped.
    #[must_use = "dropping the guard unsubscribes immediately"]
    pub fn subscribe(&self, topic: Topic, listener: Listener) -> ListenerGuard {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .listeners
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(id, Registration { topic, listener });
        ListenerGuard {
            id,
            topic,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Delivers `signal` to every listener of its topic.
    ///
    /// Listeners are snapshotted before delivery and called without holding
    /// the registry lock, so a listener may subscribe or unsubscribe freely.
    pub fn dispatch(&self, signal: Signal) -> DispatchOutcome {
        let topic = signal.topic();
        let listeners: Vec<Listener> = self
            .registry
            .listeners
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .filter(|registration| registration.topic == topic)
            .map(|registration| Arc::clone(&registration.listener))
            .collect();

        let event = DocumentEvent::new(signal);
        for listener in &listeners {
            listener(&event);
        }

        DispatchOutcome {
            default_prevented: event.default_prevented(),
            delivered: listeners.len(),
        }
    }

    /// Number of live listeners on `topic`.
    #[must_use]
    pub fn listener_count(&self, topic: Topic) -> usize {
        self.registry
            .listeners
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .filter(|registration| registration.topic == topic)
            .count()
    }
}

impl fmt::Debug for SignalBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self
            .registry
            .listeners
            .read()
            .map_or(0, |listeners| listeners.len());
        f.debug_struct("SignalBus").field("listeners", &count).finish()
    }
}

/// Live subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct ListenerGuard {
    id: u64,
    topic: Topic,
    registry: Weak<Registry>,
}

impl ListenerGuard {
    /// Returns the subscribed topic.
    #[must_use]
    pub const fn topic(&self) -> Topic {
        self.topic
    }

    /// Unsubscribes now.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry
                .listeners
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .remove(&self.id);
        }
    }
}

// =============================================================================
// Document
// =============================================================================

/// Errors from fullscreen requests.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FullscreenError {
    /// The host refused the request (for example, not user-initiated).
    #[error("fullscreen request rejected: {0}")]
    Rejected(String),

    /// The host has no fullscreen capability.
    #[error("fullscreen is not supported by this host")]
    Unsupported,
}

/// Host document.
#[async_trait]
pub trait Document: Send + Sync {
    /// Current visibility.
    fn visibility_state(&self) -> VisibilityState;

    /// Whether some element currently occupies the fullscreen.
    fn has_fullscreen_element(&self) -> bool;

    /// The bus the host dispatches native signals on.
    fn signals(&self) -> &SignalBus;

    /// Asks the host to put `target` in fullscreen.
    ///
    /// # Errors
    ///
    /// Returns [`FullscreenError`] if the host refuses.
    async fn request_fullscreen(&self, target: &SurfaceId) -> Result<(), FullscreenError>;
}
