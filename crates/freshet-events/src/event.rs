#![forbid(unsafe_code)]

use std::time::Duration;

/// Unified event for the consumer pipeline. Hierarchical: each subsystem
/// has its own variant with a sub-enum.
#[derive(Clone, Debug)]
pub enum Event {
    Fetch(FetchEvent),
    Net(NetEvent),
    Playback(PlaybackEvent),
}

/// Events from the assembly side (pipeline, buffer, slots).
#[derive(Clone, Debug)]
pub enum FetchEvent {
    /// A frame finished assembling.
    SlotReady {
        sample_no: u64,
        assembly: Duration,
        recovered: bool,
    },
    /// A frame could not be assembled within its retry budget.
    SlotUnfetchable { sample_no: u64 },
    /// The slot pool was exhausted; the pulse will be retried.
    PulseSkipped { sample_no: u64 },
    /// The pipeline window changed (adaptive mode).
    WindowChanged { window: usize },
}

/// Events from the request queue.
#[derive(Clone, Debug)]
pub enum NetEvent {
    /// Fresh DRD and jitter estimates after an original reply.
    Estimates { drd: Duration, jitter: Duration },
}

/// Events from the playout side.
#[derive(Clone, Debug)]
pub enum PlaybackEvent {
    /// A frame was released to the sink.
    FrameReleased { sample_no: u64, timestamp_ms: u64 },
    /// A frame assembled after a later one had already played.
    LateArrival { sample_no: u64 },
}

impl From<FetchEvent> for Event {
    fn from(e: FetchEvent) -> Self {
        Self::Fetch(e)
    }
}

impl From<NetEvent> for Event {
    fn from(e: NetEvent) -> Self {
        Self::Net(e)
    }
}

impl From<PlaybackEvent> for Event {
    fn from(e: PlaybackEvent) -> Self {
        Self::Playback(e)
    }
}
