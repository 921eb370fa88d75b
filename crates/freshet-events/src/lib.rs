//! Event surface of the freshet consumer.
//!
//! Components publish onto a shared [`EventBus`]; UIs, stats collectors
//! and tests subscribe. Publishing is synchronous and never blocks the
//! pipeline; subscribers that fall behind observe a lag error instead of
//! slowing producers down.

#![forbid(unsafe_code)]

mod bus;
mod event;

pub use bus::EventBus;
pub use event::{Event, FetchEvent, NetEvent, PlaybackEvent};
