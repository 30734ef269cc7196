//! Collector-backed event sink.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, trace};

use super::{CollectorTransport, EventSink};
use crate::event::ViolationEvent;

/// Upper bound for one delivery before it is abandoned.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Ships each event to the collector on a detached task.
///
/// The runtime handle is captured at construction so `send` can be called from
/// synchronous signal listeners that have no runtime context of their own.
#[derive(Clone)]
pub struct CollectorLogger {
    transport: Arc<dyn CollectorTransport>,
    runtime: Handle,
    delivery_timeout: Duration,
}

impl CollectorLogger {
    /// Creates a logger spawning deliveries on `runtime`.
    #[must_use]
    pub fn new(transport: Arc<dyn CollectorTransport>, runtime: Handle) -> Self {
        Self {
            transport,
            runtime,
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }

    /// Sets the per-delivery timeout.
    #[must_use]
    pub const fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }
}

impl EventSink for CollectorLogger {
    fn send(&self, event: ViolationEvent) {
        let record = event.to_record();
        let transport = Arc::clone(&self.transport);
        let delivery_timeout = self.delivery_timeout;

        // Detached: the JoinHandle is dropped and nobody awaits the result.
        drop(self.runtime.spawn(async move {
            let kind = record.kind;
            match tokio::time::timeout(delivery_timeout, transport.deliver(&record)).await {
                Ok(Ok(())) => trace!(kind = %kind, "proctor event delivered"),
                Ok(Err(e)) => debug!(kind = %kind, error = %e, "proctor event dropped"),
                Err(_) => debug!(
                    kind = %kind,
                    timeout_ms = u64::try_from(delivery_timeout.as_millis()).unwrap_or(u64::MAX),
                    "proctor event delivery timed out"
                ),
            }
        }));
    }
}

impl fmt::Debug for CollectorLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectorLogger")
            .field("delivery_timeout", &self.delivery_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;
    use crate::event::{EventKind, ProctorLogRecord};
    use crate::telemetry::TransportError;

    struct ChannelTransport {
        tx: mpsc::UnboundedSender<ProctorLogRecord>,
        fail: bool,
    }

    #[async_trait]
    impl CollectorTransport for ChannelTransport {
        async fn deliver(&self, record: &ProctorLogRecord) -> Result<(), TransportError> {
            let _ = self.tx.send(record.clone());
            if self.fail {
                Err(TransportError::Rejected { status: 503 })
            } else {
                Ok(())
            }
        }
    }

    struct StalledTransport;

    #[async_trait]
    impl CollectorTransport for StalledTransport {
        async fn deliver(&self, _record: &ProctorLogRecord) -> Result<(), TransportError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_send_delivers_record() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let logger = CollectorLogger::new(
            Arc::new(ChannelTransport { tx, fail: false }),
            Handle::current(),
        );

        logger.send(ViolationEvent::now(EventKind::CutAttempt, Some(9)));

        let record = rx.recv().await.unwrap();
        assert_eq!(record.kind, EventKind::CutAttempt);
        assert_eq!(record.assessment_id, Some(9));
    }

    #[tokio::test]
    async fn test_failed_delivery_is_swallowed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let logger = CollectorLogger::new(
            Arc::new(ChannelTransport { tx, fail: true }),
            Handle::current(),
        );

        logger.send(ViolationEvent::now(EventKind::ContextMenu, Some(1)));
        logger.send(ViolationEvent::now(EventKind::ContextMenu, Some(1)));

        // Both attempts happen exactly once each: no retry.
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_delivery_does_not_block_sender() {
        let logger = CollectorLogger::new(Arc::new(StalledTransport), Handle::current())
            .with_delivery_timeout(Duration::from_millis(50));

        let started = tokio::time::Instant::now();
        logger.send(ViolationEvent::now(EventKind::TabSwitch, None));
        assert!(started.elapsed() < Duration::from_millis(1));

        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
