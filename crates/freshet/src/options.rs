#![forbid(unsafe_code)]

use std::time::Duration;

use freshet_buffer::{Buffer, SlotPool};
use freshet_core::NamespaceInfo;

/// Configuration of one fetching session.
#[derive(Clone, Debug)]
pub struct ConsumerOptions {
    /// Thread-level prefix of the stream to fetch.
    pub prefix: NamespaceInfo,
    /// Fixed pipeline window; `None` enables the adaptive window.
    pub pipeline_size: Option<usize>,
    /// Sample-number increment per pulse.
    pub pipeline_step: u64,
    /// Interest lifetime.
    pub interest_lifetime: Duration,
    /// Slot pool capacity (bounds frames in flight and peak memory).
    pub pool_capacity: usize,
    /// Initial per-slot payload buffer size.
    pub payload_capacity: usize,
    /// Retransmission budget per segment.
    pub max_retx: u8,
    /// Period of the `_live` refresh keeping estimates current.
    pub live_refresh: Duration,
    /// Request and use parity segments for recovery.
    pub use_fec: bool,
    /// Event bus channel capacity.
    pub event_capacity: usize,
    /// Smoothing weight for the per-frame assembly delay average.
    pub delay_theta: f64,
    /// Jitter multiplier in the buffer delay estimate.
    pub delay_gamma: f64,
}

impl ConsumerOptions {
    pub fn new(prefix: NamespaceInfo) -> Self {
        Self {
            prefix,
            pipeline_size: None,
            pipeline_step: 1,
            interest_lifetime: Duration::from_secs(2),
            pool_capacity: SlotPool::DEFAULT_CAPACITY,
            payload_capacity: 16_000,
            max_retx: 3,
            live_refresh: Duration::from_millis(1000),
            use_fec: false,
            event_capacity: 64,
            delay_theta: Buffer::DEFAULT_THETA,
            delay_gamma: Buffer::DEFAULT_GAMMA,
        }
    }

    /// Fix the pipeline window instead of adapting it.
    pub fn with_pipeline_size(mut self, size: usize) -> Self {
        self.pipeline_size = Some(size);
        self
    }

    pub fn with_fec(mut self, use_fec: bool) -> Self {
        self.use_fec = use_fec;
        self
    }

    pub fn with_interest_lifetime(mut self, lifetime: Duration) -> Self {
        self.interest_lifetime = lifetime;
        self
    }

    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    pub fn with_max_retx(mut self, max_retx: u8) -> Self {
        self.max_retx = max_retx;
        self
    }

    pub fn with_live_refresh(mut self, period: Duration) -> Self {
        self.live_refresh = period;
        self
    }
}
