//! Interest pipelining for the freshet consumer: the per-sample pulse
//! generator and the controller that keeps a bounded, adaptive window of
//! outstanding frames.

#![forbid(unsafe_code)]

mod control;
mod pipeline;

pub use control::{PipelineController, PulseDecision};
pub use pipeline::{Pipeline, Pulse};
