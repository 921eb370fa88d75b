//! Test doubles for the freshet consumer: payload builders mirroring the
//! wire codecs, a scripted `Face` for deterministic scenarios, and a
//! synthetic live producer for smoke runs and the reference CLI.

#![forbid(unsafe_code)]

mod builders;
mod producer;
mod stub_face;

pub use builders::{
    latest_payload, live_meta_payload, media_header, ready_slot, segment_payload,
    stream_meta_payload,
};
pub use producer::{SimProducerFace, SimProducerOptions};
pub use stub_face::{Script, ScriptedFace};
