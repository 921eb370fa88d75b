#![forbid(unsafe_code)]

use std::{sync::Arc, time::Duration};

use bytes::{BufMut, Bytes, BytesMut};
use freshet_buffer::{NoFec, Slot};
use freshet_core::{LatestPointer, LiveMeta, Name, SegmentClass, SegmentHeader, StreamMeta};
use freshet_net::{DataRequest, Interest};
use tokio::time::Instant;

/// Segment header for a media segment with sane defaults.
pub fn media_header(
    class: SegmentClass,
    data_segments: u16,
    parity_segments: u16,
    timestamp_ms: u64,
) -> SegmentHeader {
    SegmentHeader {
        class,
        key_frame: false,
        data_segments,
        parity_segments,
        generation_delay_usec: 500,
        timestamp_ms,
    }
}

/// Header-prefixed media segment payload.
pub fn segment_payload(header: SegmentHeader, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(SegmentHeader::SIZE + body.len());
    header.encode(&mut buf);
    buf.put_slice(body);
    buf.freeze()
}

pub fn live_meta_payload(meta: &LiveMeta) -> Bytes {
    let mut buf = BytesMut::new();
    meta.encode(&mut buf);
    buf.freeze()
}

pub fn stream_meta_payload(meta: &StreamMeta) -> Bytes {
    let mut buf = BytesMut::new();
    meta.encode(&mut buf);
    buf.freeze()
}

/// `_latest` payload delegating to the given sample of `thread_prefix`.
pub fn latest_payload(thread_prefix: &Name, sample_no: u64) -> Bytes {
    let pointer = LatestPointer {
        delegations: vec![thread_prefix
            .clone()
            .with_str("d")
            .with(freshet_core::Component::Sequence(sample_no))],
    };
    let mut buf = BytesMut::new();
    pointer.encode(&mut buf);
    buf.freeze()
}

/// A single-segment slot already assembled and `Ready`, for playout tests.
pub fn ready_slot(thread_prefix: &Name, sample_no: u64, timestamp_ms: u64, now: Instant) -> Slot {
    let name = thread_prefix
        .clone()
        .with_str("d")
        .with(freshet_core::Component::Sequence(sample_no))
        .with(freshet_core::Component::Segment(0));
    let mut request =
        DataRequest::new(Interest::new(name, Duration::from_secs(1))).expect("grammar name");
    request.mark_expressed(now);

    let mut slot = Slot::new(16_000, 3, Arc::new(NoFec));
    slot.set_requests(std::slice::from_ref(&request), now)
        .expect("single-sample request set");

    let header = SegmentHeader {
        class: SegmentClass::Data,
        key_frame: false,
        data_segments: 1,
        parity_segments: 0,
        generation_delay_usec: 0,
        timestamp_ms,
    };
    request.complete(Bytes::from(format!("frame-{sample_no}")), Some(header), now);
    let dispatch = slot.handle(&request, now);
    assert!(dispatch.ready, "builder slot must assemble");
    slot
}
