#![forbid(unsafe_code)]

use std::time::Duration;

use freshet_buffer::{SegmentRef, Slot, SlotPool};
use freshet_core::{markers, Component, LiveMeta, Name, ParseResult};
use freshet_net::{DataRequest, Interest};
use tokio::time::Instant;
use tracing::{trace, warn};

/// Result of one pulse.
pub enum Pulse {
    /// A slot was taken from the pool and populated with the sample's
    /// request set. The requests still have to be expressed.
    Slot { slot: Slot, requests: Vec<DataRequest> },
    /// The pool is exhausted; the same sample will be retried on the next
    /// pulse.
    Skipped,
}

/// Pulse-driven Interest generator.
///
/// Each pulse emits the request set for the next sample, sized by the
/// freshest live-meta estimate, and advances by `step`.
pub struct Pipeline {
    thread_prefix: Name,
    next_sample: u64,
    step: u64,
    lifetime: Duration,
    use_fec: bool,
}

impl Pipeline {
    pub fn new(
        thread_prefix: Name,
        start_sample: u64,
        step: u64,
        lifetime: Duration,
        use_fec: bool,
    ) -> Self {
        Self {
            thread_prefix,
            next_sample: start_sample,
            step: step.max(1),
            lifetime,
            use_fec,
        }
    }

    pub fn next_sample(&self) -> u64 {
        self.next_sample
    }

    /// Produce the Interest set for the next sample. On pool exhaustion
    /// nothing advances, so the sample is retried once a slot frees up.
    pub fn pulse(&mut self, live: &LiveMeta, pool: &mut SlotPool, now: Instant) -> Pulse {
        let Some(mut slot) = pool.pop() else {
            trace!(sample = self.next_sample, "pulse skipped: pool exhausted");
            return Pulse::Skipped;
        };

        let key_frame = live.gop_size > 0 && self.next_sample % u64::from(live.gop_size) == 0;
        let frame_prefix = frame_prefix(&self.thread_prefix, key_frame, self.next_sample);
        let n_data = live.segnum_estimate.max(1);
        let n_parity = if self.use_fec {
            live.parity_segnum_estimate
        } else {
            0
        };

        let requests =
            match Self::requests_for_frame(&frame_prefix, self.lifetime, n_data, n_parity) {
                Ok(requests) => requests,
                Err(err) => {
                    warn!(%err, prefix = %frame_prefix, "pulse dropped: bad frame prefix");
                    pool.push(slot);
                    return Pulse::Skipped;
                }
            };
        if let Err(err) = slot.set_requests(&requests, now) {
            warn!(%err, prefix = %frame_prefix, "pulse dropped: request set rejected");
            pool.push(slot);
            return Pulse::Skipped;
        }

        trace!(
            sample = self.next_sample,
            key_frame,
            n_data,
            n_parity,
            "pulse"
        );
        self.next_sample += self.step;
        Pulse::Slot { slot, requests }
    }

    /// Ordered Interests for one frame: data segments first, then parity.
    pub fn requests_for_frame(
        frame_prefix: &Name,
        lifetime: Duration,
        n_data: u32,
        n_parity: u32,
    ) -> ParseResult<Vec<DataRequest>> {
        let mut segments: Vec<SegmentRef> = (0..n_data)
            .map(|seg_no| SegmentRef {
                seg_no,
                parity: false,
            })
            .collect();
        segments.extend((0..n_parity).map(|seg_no| SegmentRef {
            seg_no,
            parity: true,
        }));
        Self::requests_for_segments(frame_prefix, &segments, lifetime)
    }

    /// Interests for specific segments of a sample, used for
    /// retransmissions and under-estimation corrections.
    pub fn requests_for_segments(
        sample_prefix: &Name,
        segments: &[SegmentRef],
        lifetime: Duration,
    ) -> ParseResult<Vec<DataRequest>> {
        segments
            .iter()
            .map(|segment| {
                let mut name = sample_prefix.clone();
                if segment.parity {
                    name = name.with_str(markers::PARITY);
                }
                name = name.with(Component::Segment(u64::from(segment.seg_no)));
                DataRequest::new(Interest::new(name, lifetime))
            })
            .collect()
    }
}

fn frame_prefix(thread_prefix: &Name, key_frame: bool, sample_no: u64) -> Name {
    thread_prefix
        .clone()
        .with_str(if key_frame { markers::KEY } else { markers::DELTA })
        .with(Component::Sequence(sample_no))
}
