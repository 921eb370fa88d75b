#![forbid(unsafe_code)]

use bytes::Bytes;

/// One reassembled frame, released in decode order.
#[derive(Clone, Debug)]
pub struct FrameOut {
    pub sample_no: u64,
    pub timestamp_ms: u64,
    pub key_frame: bool,
    /// The frame needed FEC recovery to assemble.
    pub recovered: bool,
    /// Encoded codec bytes, ready for the decoder.
    pub bytes: Bytes,
}

/// Downstream consumer of released frames (decoder, file writer, UI).
pub trait FrameSink: Send {
    fn frame(&mut self, frame: FrameOut);
}

impl<F: FnMut(FrameOut) + Send> FrameSink for F {
    fn frame(&mut self, frame: FrameOut) {
        self(frame);
    }
}
