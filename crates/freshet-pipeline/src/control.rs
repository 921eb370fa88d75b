#![forbid(unsafe_code)]

use std::time::Duration;

use tracing::debug;

/// Whether a pulse may go ahead.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PulseDecision {
    Granted,
    Skipped,
}

/// Keeps the number of outstanding frames within a target window `W`.
///
/// `grant` admits a pulse while `outstanding < W`; every slot settling
/// (ready or unfetchable) calls `complete`, which frees a seat for the
/// refill pulse. In adaptive mode the window follows the jitter-buffer
/// delay estimate: `W = max(3, ceil(B / sample_period))`.
#[derive(Debug)]
pub struct PipelineController {
    window: usize,
    outstanding: usize,
    adaptive: bool,
}

impl PipelineController {
    pub const MIN_WINDOW: usize = 3;

    pub fn new(window: usize, adaptive: bool) -> Self {
        Self {
            window: window.max(Self::MIN_WINDOW),
            outstanding: 0,
            adaptive,
        }
    }

    /// Ask for a pulse seat.
    pub fn grant(&mut self) -> PulseDecision {
        if self.outstanding < self.window {
            self.outstanding += 1;
            PulseDecision::Granted
        } else {
            PulseDecision::Skipped
        }
    }

    /// Un-count a granted pulse that the pipeline could not perform
    /// (pool exhaustion).
    pub fn revert(&mut self) {
        self.outstanding = self.outstanding.saturating_sub(1);
    }

    /// A frame settled (ready or unfetchable).
    pub fn complete(&mut self) {
        debug_assert!(self.outstanding > 0);
        self.outstanding = self.outstanding.saturating_sub(1);
    }

    /// Recompute the window from the buffer delay estimate. No-op unless
    /// the controller was built adaptive.
    pub fn adapt(&mut self, delay_estimate: Duration, sample_period: Duration) {
        if !self.adaptive || sample_period.is_zero() {
            return;
        }
        let ratio = delay_estimate.as_secs_f64() / sample_period.as_secs_f64();
        let window = (ratio.ceil() as usize).max(Self::MIN_WINDOW);
        if window != self.window {
            debug!(old = self.window, new = window, "pipeline window adapted");
            self.window = window;
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }
}
