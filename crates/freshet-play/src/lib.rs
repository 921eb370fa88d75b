//! Playout ordering for the freshet consumer: assembled slots queue up by
//! decode timestamp and are released at the stream's nominal sample
//! period, behind a jitter-buffer delay.

#![forbid(unsafe_code)]

mod queue;

pub use queue::{Ingest, PlaybackQueue};
