//! Core value types for the freshet consumer: hierarchical names, the
//! stream namespace grammar, and the wire payload codecs the fetching
//! engine needs to interpret incoming segments.

#![forbid(unsafe_code)]

mod error;
mod name;
mod namespace;
mod wire;

pub use error::{ParseError, ParseResult};
pub use name::{Component, Name};
pub use namespace::{markers, NameFilter, NamespaceInfo, StreamType, API_VERSION};
pub use wire::{LatestPointer, LiveMeta, SegmentClass, SegmentHeader, StreamMeta};
