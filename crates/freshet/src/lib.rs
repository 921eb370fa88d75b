//! freshet: a consumer-side fetching engine for low-latency real-time
//! video over a named-data substrate.
//!
//! Given a stream prefix, the [`Consumer`] bootstraps from the producer's
//! `_live`/`_latest`/`_meta` records, pipelines Interests for future
//! frames, reassembles them in a jitter buffer and releases them to a
//! [`FrameSink`] in decode order at the stream's nominal frame rate.
//!
//! The actual transport ([`Face`](freshet_net::Face)), signature
//! verification ([`Verifier`](freshet_net::Verifier)) and the VP8 decoder
//! downstream of the sink are collaborator contracts supplied by the
//! embedding application.

#![forbid(unsafe_code)]

mod bootstrap;
mod consumer;
mod error;
mod options;
mod sink;

pub use bootstrap::{bootstrap, BootstrapInfo};
pub use consumer::Consumer;
pub use error::{ConsumerError, ConsumerResult};
pub use options::ConsumerOptions;
pub use sink::{FrameOut, FrameSink};
