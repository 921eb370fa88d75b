#![forbid(unsafe_code)]

use std::{collections::BTreeMap, time::Duration};

use freshet_net::{DataRequest, Ewma};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::{
    error::{BufferError, BufferResult},
    slot::{SegmentRef, Slot, SlotState},
};

/// What the buffer reports upward after routing one completed request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BufferEvent {
    SlotReady { sample_no: u64 },
    SlotUnfetchable { sample_no: u64 },
    NeedData { sample_no: u64, segments: Vec<SegmentRef> },
}

/// Owns in-flight slots keyed by sample number and mediates between
/// request completions and the playout side.
///
/// The jitter-buffer delay estimate follows
/// `B(i) = dq_avg(i) + gamma * jitter`, with
/// `dq_avg(i) = theta * dq_avg(i-1) + (1 - theta) * dq(i)` where `dq(i)`
/// is the i-th frame's assembly delay.
pub struct Buffer {
    slots: BTreeMap<u64, Slot>,
    dq_avg: Ewma,
    gamma: f64,
}

impl Buffer {
    pub const DEFAULT_THETA: f64 = 0.95;
    pub const DEFAULT_GAMMA: f64 = 2.0;

    pub fn new(theta: f64, gamma: f64) -> Self {
        Self {
            slots: BTreeMap::new(),
            dq_avg: Ewma::new(theta),
            gamma,
        }
    }

    /// Adopt a slot the pipeline just prepared. The slot must already
    /// carry its request set; a rejected slot is handed back so the
    /// caller can return it to the pool.
    pub fn adopt(&mut self, slot: Slot) -> Result<(), (BufferError, Slot)> {
        if slot.state() != SlotState::New {
            return Err((BufferError::SlotNotFree, slot));
        }
        let sample_no = slot.sample_no();
        if self.slots.contains_key(&sample_no) {
            return Err((BufferError::DuplicateSample(sample_no), slot));
        }
        trace!(sample = sample_no, "buffer adopted slot");
        self.slots.insert(sample_no, slot);
        Ok(())
    }

    /// Route one completed request into its slot. Completions for samples
    /// no longer buffered (already played out, evicted, or never pulsed)
    /// are dropped.
    pub fn dispatch(&mut self, request: &DataRequest, now: Instant) -> Vec<BufferEvent> {
        let Some(sample_no) = request.info().sample_no.filter(|_| request.info().is_sample())
        else {
            return Vec::new();
        };
        let Some(slot) = self.slots.get_mut(&sample_no) else {
            trace!(sample = sample_no, "completion for unbuffered sample dropped");
            return Vec::new();
        };

        let dispatch = slot.handle(request, now);
        let mut events = Vec::new();

        if !dispatch.need_data.is_empty() {
            events.push(BufferEvent::NeedData {
                sample_no,
                segments: dispatch.need_data,
            });
        }
        if dispatch.ready {
            let dq_ms = slot.longest_drd().as_secs_f64() * 1000.0;
            self.dq_avg.push(dq_ms);
            debug!(
                sample = sample_no,
                assembly_ms = dq_ms,
                recovered = slot.recovered(),
                "slot ready"
            );
            events.push(BufferEvent::SlotReady { sample_no });
        }
        if dispatch.unfetchable {
            debug!(sample = sample_no, "slot unfetchable");
            events.push(BufferEvent::SlotUnfetchable { sample_no });
        }
        events
    }

    /// Account additional requests (retransmissions, corrections) against
    /// the sample's slot.
    pub fn add_requests(&mut self, sample_no: u64, requests: &[DataRequest]) -> BufferResult<()> {
        let slot = self
            .slots
            .get_mut(&sample_no)
            .ok_or(BufferError::UnknownSample(sample_no))?;
        slot.add_requests(requests)
    }

    /// Hand a slot back to the caller (for playout ingestion or eviction).
    pub fn take(&mut self, sample_no: u64) -> Option<Slot> {
        self.slots.remove(&sample_no)
    }

    /// Evict every slot, e.g. at shutdown. Slots come out in sample order.
    pub fn drain(&mut self) -> Vec<Slot> {
        let drained = std::mem::take(&mut self.slots);
        drained.into_values().collect()
    }

    /// Jitter-buffer delay estimate `B = dq_avg + gamma * jitter`.
    pub fn delay_estimate(&self, jitter: Duration) -> Duration {
        let dq_ms = self.dq_avg.value().unwrap_or(0.0);
        let b_ms = dq_ms + self.gamma * jitter.as_secs_f64() * 1000.0;
        Duration::from_secs_f64(b_ms / 1000.0)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, sample_no: u64) -> bool {
        self.slots.contains_key(&sample_no)
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new(Self::DEFAULT_THETA, Self::DEFAULT_GAMMA)
    }
}
