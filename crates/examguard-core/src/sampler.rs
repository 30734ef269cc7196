//! Periodic webcam snapshots.
//!
//! The sampler runs on its own clock, independent of the violation pipeline.
//! Snapshots are audit trail only: they go to the event sink and never reach
//! the escalator.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::camera::FrameSource;
use crate::event::{EventKind, ViolationEvent};
use crate::telemetry::EventSink;

/// Snapshot period of the reference deployment.
pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(30);

/// Periodic still capture.
pub struct SnapshotSampler {
    assessment_id: Option<i64>,
    interval: Duration,
    camera: Arc<dyn FrameSource>,
    sink: Arc<dyn EventSink>,
}

impl SnapshotSampler {
    /// Creates a sampler with the default period.
    #[must_use]
    pub fn new(
        assessment_id: Option<i64>,
        camera: Arc<dyn FrameSource>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            assessment_id,
            interval: DEFAULT_SNAPSHOT_INTERVAL,
            camera,
            sink,
        }
    }

    /// Sets the period. Zero is bumped to one millisecond.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Performs one tick: capture and, if a frame came back, ship it.
    ///
    /// Returns whether a snapshot was sent.
    pub fn tick(&self) -> bool {
        let Some(frame) = self.camera.capture_still() else {
            trace!("no camera frame available, skipping snapshot");
            return false;
        };
        let event = ViolationEvent::now(EventKind::WebcamSnapshot, self.assessment_id)
            .with_payload(frame.to_payload());
        self.sink.send(event);
        debug!(bytes = frame.data().len(), "webcam snapshot sent");
        true
    }

    /// Starts ticking on `runtime`. The first tick fires one period from now.
    #[must_use = "dropping the handle stops the sampler"]
    pub fn spawn(self, runtime: &Handle) -> SamplerHandle {
        let period = self.interval;
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.tick();
            }
        });
        SamplerHandle { task: Some(task) }
    }
}

impl std::fmt::Debug for SnapshotSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotSampler")
            .field("assessment_id", &self.assessment_id)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// Owns the running sampler task. Stopping or dropping it aborts the task.
#[derive(Debug)]
pub struct SamplerHandle {
    task: Option<JoinHandle<()>>,
}

impl SamplerHandle {
    /// Aborts the sampler and waits until the task is gone.
    pub async fn stop(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }

    /// Whether the task is still scheduled.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Frame, NoCamera, StillImage};
    use crate::telemetry::MemorySink;

    const PERIOD: Duration = Duration::from_secs(30);

    fn sampler(camera: Arc<dyn FrameSource>) -> (SnapshotSampler, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let sampler = SnapshotSampler::new(Some(5), camera, Arc::clone(&sink) as Arc<dyn EventSink>)
            .with_interval(PERIOD);
        (sampler, sink)
    }

    /// Advances paused time in small steps so the sampler task gets polled.
    async fn advance(by: Duration) {
        let step = Duration::from_secs(1);
        let mut elapsed = Duration::ZERO;
        while elapsed < by {
            tokio::time::advance(step).await;
            tokio::task::yield_now().await;
            elapsed += step;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_camera_sends_nothing() {
        let (sampler, sink) = sampler(Arc::new(NoCamera));
        let handle = sampler.spawn(&Handle::current());

        advance(PERIOD * 3).await;

        assert!(sink.is_empty());
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_snapshot_per_period() {
        let camera = Arc::new(StillImage::new(Frame::new("image/jpeg", vec![1, 2, 3])));
        let (sampler, sink) = sampler(camera);
        let handle = sampler.spawn(&Handle::current());

        advance(PERIOD - Duration::from_secs(1)).await;
        assert_eq!(sink.len(), 0);

        advance(Duration::from_secs(1)).await;
        assert_eq!(sink.count_of(EventKind::WebcamSnapshot), 1);

        advance(PERIOD * 2).await;
        assert_eq!(sink.count_of(EventKind::WebcamSnapshot), 3);

        let event = &sink.events()[0];
        assert_eq!(event.assessment_id(), Some(5));
        assert!(
            event.payload().unwrap()["imageBase64"]
                .as_str()
                .unwrap()
                .starts_with("data:image/jpeg;base64,")
        );
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_leaves_no_ticks_behind() {
        let camera = Arc::new(StillImage::new(Frame::new("image/jpeg", vec![1])));
        let (sampler, sink) = sampler(camera);
        let handle = sampler.spawn(&Handle::current());
        assert!(handle.is_running());

        handle.stop().await;
        advance(PERIOD * 4).await;

        assert!(sink.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_camera_lost_mid_session_is_a_no_op() {
        let camera = Arc::new(StillImage::new(Frame::new("image/jpeg", vec![1])));
        let (sampler, sink) = sampler(Arc::clone(&camera) as Arc<dyn FrameSource>);
        let handle = sampler.spawn(&Handle::current());

        advance(PERIOD).await;
        camera.disconnect();
        advance(PERIOD * 2).await;

        assert_eq!(sink.len(), 1);
        drop(handle);
    }
}
