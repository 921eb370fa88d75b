//! Frame assembly for the freshet consumer: per-sample slots with their
//! state machine, the bounded slot pool, and the buffer that routes
//! completed requests to slots and measures assembly delay.

#![forbid(unsafe_code)]

mod buffer;
mod error;
mod fec;
mod pool;
mod segset;
mod slot;

pub use buffer::{Buffer, BufferEvent};
pub use error::{BufferError, BufferResult};
pub use fec::{FecDecoder, NoFec, XorParityFec};
pub use pool::SlotPool;
pub use segset::SegmentSet;
pub use slot::{SegmentRef, Slot, SlotDispatch, SlotState};
