//! Scoped release of everything a session acquires at start.

use tracing::debug;

use crate::guard::{FullscreenGuard, InputGuard, VisibilityWatcher};
use crate::sampler::SamplerHandle;

/// Subscriptions and the snapshot timer owned by one running session.
///
/// Released as a unit by [`Teardown::release`] or on drop.
#[derive(Debug)]
pub struct Teardown {
    visibility: VisibilityWatcher,
    fullscreen: FullscreenGuard,
    input: InputGuard,
    sampler: SamplerHandle,
}

impl Teardown {
    pub(crate) const fn new(
        visibility: VisibilityWatcher,
        fullscreen: FullscreenGuard,
        input: InputGuard,
        sampler: SamplerHandle,
    ) -> Self {
        Self {
            visibility,
            fullscreen,
            input,
            sampler,
        }
    }

    /// Stops the sampler and unsubscribes every guard.
    pub fn release(self) {
        let Self {
            visibility,
            fullscreen,
            input,
            sampler,
        } = self;
        drop(sampler);
        input.detach();
        fullscreen.detach();
        visibility.detach();
        debug!("session resources released");
    }
}
