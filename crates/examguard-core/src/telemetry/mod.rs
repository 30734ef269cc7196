//! Best-effort proctor telemetry.
//!
//! # Contract
//!
//! [`EventSink::send`] returns `()`. It never reports an error, never retries,
//! never blocks the caller on I/O, and gives no ordering or deduplication
//! guarantee across concurrent sends. Losing an event is acceptable;
//! disturbing the candidate is not. Implementations must keep this contract:
//! retries or back-pressure belong on the collector side.
//!
//! - [`CollectorLogger`] ships events to the collector endpoint over a
//!   [`CollectorTransport`], one detached task per event.
//! - [`MemorySink`] keeps events in memory for harnesses and tests.

mod collector;
mod memory;

use async_trait::async_trait;
use thiserror::Error;

pub use collector::{CollectorLogger, DEFAULT_DELIVERY_TIMEOUT};
pub use memory::MemorySink;

use crate::event::{ProctorLogRecord, ViolationEvent};

/// Fire-and-forget event sink.
pub trait EventSink: Send + Sync {
    /// Hands `event` to the sink. Never fails from the caller's point of view.
    fn send(&self, event: ViolationEvent);
}

/// Errors from a single delivery attempt. Logged by the sink, never surfaced.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    /// The request could not be built or sent.
    #[error("network error: {0}")]
    Network(String),

    /// The collector answered with a non-success status.
    #[error("collector rejected event with status {status}")]
    Rejected {
        /// HTTP status code.
        status: u16,
    },

    /// The event could not be serialized.
    #[error("failed to encode event: {0}")]
    Encode(String),
}

/// Single-shot delivery of one record to the collector.
#[async_trait]
pub trait CollectorTransport: Send + Sync {
    /// Delivers `record`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if delivery fails. Callers drop the error.
    async fn deliver(&self, record: &ProctorLogRecord) -> Result<(), TransportError>;
}
