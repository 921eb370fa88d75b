#![forbid(unsafe_code)]

use std::{collections::HashMap, sync::Arc, time::Duration};

use bytes::Bytes;
use freshet_core::{Name, NameFilter, SegmentClass, SegmentHeader};
use freshet_net::{DataRequest, RequestStatus};
use tokio::time::Instant;
use tracing::{trace, warn};

use crate::{
    error::{BufferError, BufferResult},
    fec::FecDecoder,
    segset::SegmentSet,
};

/// Upper bound on segment numbers a slot will account for. Anything above
/// this is a malformed or hostile name.
const MAX_SEGMENT: u32 = 16_384;

/// Assembly state of a slot.
///
/// Forward-only: `Free → New → Pending → Assembling → Ready → Locked`,
/// with `Unfetchable` terminal from any pre-Ready state. Only `clear()`
/// goes back to `Free`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SlotState {
    Free,
    New,
    Pending,
    Assembling,
    Ready,
    Locked,
    Unfetchable,
}

/// A segment the slot wants (re)requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentRef {
    pub seg_no: u32,
    pub parity: bool,
}

/// What one completed request did to the slot. `ready` and `unfetchable`
/// each fire at most once per acquisition.
#[derive(Debug, Default)]
pub struct SlotDispatch {
    pub need_data: Vec<SegmentRef>,
    pub ready: bool,
    pub unfetchable: bool,
}

/// Per-frame assembly unit. Owns the accounting for the requests of one
/// sample, learns the frame geometry from the first arriving segment
/// header, and assembles (or FEC-recovers) the frame bytes.
pub struct Slot {
    state: SlotState,
    name: Name,
    sample_no: u64,
    key_by_name: bool,

    n_data: Option<u16>,
    n_parity: Option<u16>,
    requested: SegmentSet,
    requested_parity: SegmentSet,
    fetched: SegmentSet,
    fetched_parity: SegmentSet,
    data_payloads: Vec<Option<Bytes>>,
    parity_payloads: Vec<Option<Bytes>>,
    retx: HashMap<u32, u8>,
    max_retx: u8,
    outstanding_data: usize,
    outstanding_parity: usize,

    first_request_ts: Option<Instant>,
    first_data_ts: Option<Instant>,
    last_data_ts: Option<Instant>,
    fetch_progress: f64,
    fetched_bytes: usize,

    header: Option<SegmentHeader>,
    assembled: Option<Bytes>,
    recovered: bool,
    ready_fired: bool,
    unfetchable_fired: bool,

    fec: Arc<dyn FecDecoder>,
    assembly_buf: Vec<u8>,
}

impl Slot {
    pub fn new(payload_capacity: usize, max_retx: u8, fec: Arc<dyn FecDecoder>) -> Self {
        Self {
            state: SlotState::Free,
            name: Name::new(),
            sample_no: 0,
            key_by_name: false,
            n_data: None,
            n_parity: None,
            requested: SegmentSet::new(),
            requested_parity: SegmentSet::new(),
            fetched: SegmentSet::new(),
            fetched_parity: SegmentSet::new(),
            data_payloads: Vec::new(),
            parity_payloads: Vec::new(),
            retx: HashMap::new(),
            max_retx,
            outstanding_data: 0,
            outstanding_parity: 0,
            first_request_ts: None,
            first_data_ts: None,
            last_data_ts: None,
            fetch_progress: 0.0,
            fetched_bytes: 0,
            header: None,
            assembled: None,
            recovered: false,
            ready_fired: false,
            unfetchable_fired: false,
            fec,
            assembly_buf: Vec::with_capacity(payload_capacity),
        }
    }

    /// First-time assignment of the pulse's request set. All requests must
    /// address segments of the same sample.
    pub fn set_requests(&mut self, requests: &[DataRequest], now: Instant) -> BufferResult<()> {
        if self.state != SlotState::Free {
            return Err(BufferError::SlotNotFree);
        }
        let (name, sample_no) = common_sample(requests)?;

        for request in requests {
            self.track_request(request)?;
        }
        self.name = name;
        self.sample_no = sample_no;
        self.key_by_name = !requests[0].info().is_delta;
        self.state = SlotState::New;
        self.first_request_ts = Some(now);
        Ok(())
    }

    /// Account for additional requests issued after the initial pulse
    /// (retransmissions and under-estimation corrections).
    pub fn add_requests(&mut self, requests: &[DataRequest]) -> BufferResult<()> {
        if !matches!(
            self.state,
            SlotState::New | SlotState::Pending | SlotState::Assembling
        ) {
            return Err(BufferError::SlotNotActive);
        }
        for request in requests {
            let info = request.info();
            if !info.is_sample() || info.prefix(NameFilter::Sample) != self.name {
                return Err(BufferError::InvalidRequestSet);
            }
            self.track_request_unchecked(request)?;
        }
        Ok(())
    }

    /// Route one terminal request into the slot.
    pub fn handle(&mut self, request: &DataRequest, now: Instant) -> SlotDispatch {
        let mut dispatch = SlotDispatch::default();
        if matches!(
            self.state,
            SlotState::Free | SlotState::Ready | SlotState::Locked | SlotState::Unfetchable
        ) {
            trace!(sample = self.sample_no, "dropping completion for settled slot");
            return dispatch;
        }
        debug_assert_eq!(request.info().sample_no, Some(self.sample_no));
        debug_assert!(request.status().is_terminal());

        let Some(seg) = request.info().seg_no.map(|s| s as u32) else {
            return dispatch;
        };
        let parity = request.info().is_parity;
        if parity {
            self.outstanding_parity = self.outstanding_parity.saturating_sub(1);
        } else {
            self.outstanding_data = self.outstanding_data.saturating_sub(1);
        }

        match request.status() {
            RequestStatus::Data => self.on_data(request, seg, parity, now, &mut dispatch),
            RequestStatus::Timeout | RequestStatus::NetworkNack | RequestStatus::AppNack => {
                self.on_failure(seg, parity, &mut dispatch);
            }
            RequestStatus::Cancelled => {}
            RequestStatus::Created | RequestStatus::Expressed => {
                debug_assert!(false, "non-terminal request dispatched to slot");
            }
        }

        self.check_completion(&mut dispatch);
        dispatch
    }

    fn on_data(
        &mut self,
        request: &DataRequest,
        seg: u32,
        parity: bool,
        now: Instant,
        dispatch: &mut SlotDispatch,
    ) {
        let Some(header) = request.header().copied() else {
            return;
        };
        match header.class {
            SegmentClass::Data | SegmentClass::Parity => {}
            SegmentClass::Meta | SegmentClass::Manifest => {
                trace!(sample = self.sample_no, seg, "auxiliary segment ignored");
                return;
            }
        }

        if self.first_data_ts.is_none() {
            // The first arrival teaches the slot its geometry; anything the
            // initial estimate under-requested is asked for right away.
            self.first_data_ts = Some(now);
            self.n_data = Some(header.data_segments);
            self.n_parity = Some(header.parity_segments);
            self.data_payloads
                .resize(header.data_segments as usize, None);
            self.parity_payloads
                .resize(header.parity_segments as usize, None);
            self.state = SlotState::Pending;

            for missing in self.requested.missing_below(u32::from(header.data_segments)) {
                dispatch.need_data.push(SegmentRef {
                    seg_no: missing,
                    parity: false,
                });
            }
            if !self.requested_parity.is_empty() {
                for missing in self
                    .requested_parity
                    .missing_below(u32::from(header.parity_segments))
                {
                    dispatch.need_data.push(SegmentRef {
                        seg_no: missing,
                        parity: true,
                    });
                }
            }
        }

        let in_range = if parity {
            (seg as usize) < self.parity_payloads.len()
        } else {
            (seg as usize) < self.data_payloads.len()
        };
        if !in_range {
            warn!(
                sample = self.sample_no,
                seg, parity, "segment number out of announced range"
            );
        } else {
            let newly = if parity {
                self.fetched_parity.insert(seg)
            } else {
                self.fetched.insert(seg)
            };
            if newly {
                let payload = request.payload().cloned().unwrap_or_default();
                self.fetched_bytes += payload.len();
                if parity {
                    self.parity_payloads[seg as usize] = Some(payload);
                } else {
                    self.data_payloads[seg as usize] = Some(payload);
                }
            } else {
                trace!(sample = self.sample_no, seg, parity, "duplicate segment");
            }
        }

        if self.header.is_none() {
            self.header = Some(header);
        }
        self.state = SlotState::Assembling;
        self.last_data_ts = Some(now);
        self.update_progress();
    }

    fn on_failure(&mut self, seg: u32, parity: bool, dispatch: &mut SlotDispatch) {
        // Parity is opportunistic: its loss never triggers a retry.
        if parity || self.fetched.contains(seg) {
            return;
        }
        let attempts = self.retx.entry(seg).or_insert(0);
        if *attempts < self.max_retx {
            *attempts += 1;
            dispatch.need_data.push(SegmentRef {
                seg_no: seg,
                parity: false,
            });
        }
    }

    fn check_completion(&mut self, dispatch: &mut SlotDispatch) {
        if !matches!(
            self.state,
            SlotState::New | SlotState::Pending | SlotState::Assembling
        ) {
            return;
        }

        if let Some(n_data) = self.n_data.map(usize::from).filter(|&n| n > 0) {
            if self.fetched.count() == n_data {
                self.assemble_direct(n_data);
                self.become_ready(dispatch);
                return;
            }
            // FEC is the fallback once no data segment is in flight or
            // about to be re-requested.
            let data_retx_pending = dispatch.need_data.iter().any(|s| !s.parity);
            if self.outstanding_data == 0
                && !data_retx_pending
                && self.fetched.count() + self.fetched_parity.count() >= n_data
            {
                if let Some(frame) =
                    self.fec
                        .decode(&self.data_payloads, &self.parity_payloads, n_data)
                {
                    self.assembled = Some(frame);
                    self.recovered = true;
                    self.become_ready(dispatch);
                    return;
                }
            }
        }

        if self.outstanding_data == 0
            && self.outstanding_parity == 0
            && dispatch.need_data.is_empty()
        {
            self.become_unfetchable(dispatch);
        }
    }

    fn assemble_direct(&mut self, n_data: usize) {
        self.assembly_buf.clear();
        for segment in self.data_payloads.iter().take(n_data).flatten() {
            self.assembly_buf.extend_from_slice(segment);
        }
        self.assembled = Some(Bytes::copy_from_slice(&self.assembly_buf));
    }

    fn become_ready(&mut self, dispatch: &mut SlotDispatch) {
        debug_assert!(!self.ready_fired);
        self.state = SlotState::Ready;
        self.ready_fired = true;
        dispatch.ready = true;
        dispatch.need_data.clear();
    }

    fn become_unfetchable(&mut self, dispatch: &mut SlotDispatch) {
        debug_assert!(!self.unfetchable_fired);
        self.state = SlotState::Unfetchable;
        self.unfetchable_fired = true;
        dispatch.unfetchable = true;
    }

    /// Hold a ready slot for playout.
    pub fn lock(&mut self) {
        debug_assert_eq!(self.state, SlotState::Ready);
        self.state = SlotState::Locked;
    }

    /// Reset to `Free` for reuse. Payload and assembly allocations are
    /// kept so pooled slots do not churn the allocator.
    pub fn clear(&mut self) {
        self.state = SlotState::Free;
        self.name = Name::new();
        self.sample_no = 0;
        self.key_by_name = false;
        self.n_data = None;
        self.n_parity = None;
        self.requested.clear();
        self.requested_parity.clear();
        self.fetched.clear();
        self.fetched_parity.clear();
        self.data_payloads.clear();
        self.parity_payloads.clear();
        self.retx.clear();
        self.outstanding_data = 0;
        self.outstanding_parity = 0;
        self.first_request_ts = None;
        self.first_data_ts = None;
        self.last_data_ts = None;
        self.fetch_progress = 0.0;
        self.fetched_bytes = 0;
        self.header = None;
        self.assembled = None;
        self.recovered = false;
        self.ready_fired = false;
        self.unfetchable_fired = false;
        self.assembly_buf.clear();
    }

    fn track_request(&mut self, request: &DataRequest) -> BufferResult<()> {
        let info = request.info();
        let seg = info.seg_no.ok_or(BufferError::InvalidRequestSet)? as u32;
        if seg >= MAX_SEGMENT {
            return Err(BufferError::InvalidRequestSet);
        }
        let newly = if info.is_parity {
            self.requested_parity.insert(seg)
        } else {
            self.requested.insert(seg)
        };
        if !newly {
            return Err(BufferError::InvalidRequestSet);
        }
        if info.is_parity {
            self.outstanding_parity += 1;
        } else {
            self.outstanding_data += 1;
        }
        Ok(())
    }

    fn track_request_unchecked(&mut self, request: &DataRequest) -> BufferResult<()> {
        let info = request.info();
        let seg = info.seg_no.ok_or(BufferError::InvalidRequestSet)? as u32;
        if seg >= MAX_SEGMENT {
            return Err(BufferError::InvalidRequestSet);
        }
        // Retransmissions re-add an already-requested segment.
        if info.is_parity {
            self.requested_parity.insert(seg);
            self.outstanding_parity += 1;
        } else {
            self.requested.insert(seg);
            self.outstanding_data += 1;
        }
        Ok(())
    }

    fn update_progress(&mut self) {
        let (Some(n_data), Some(n_parity)) = (self.n_data, self.n_parity) else {
            return;
        };
        let total = usize::from(n_data) + usize::from(n_parity);
        if total == 0 {
            return;
        }
        let progress =
            (self.fetched.count() + self.fetched_parity.count()) as f64 / total as f64;
        debug_assert!(progress >= self.fetch_progress);
        self.fetch_progress = progress;
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    /// Common sample prefix of the slot's requests.
    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn sample_no(&self) -> u64 {
        self.sample_no
    }

    pub fn fetch_progress(&self) -> f64 {
        self.fetch_progress
    }

    pub fn recovered(&self) -> bool {
        self.recovered
    }

    /// Frame metadata from the first arrived segment header.
    pub fn frame_meta(&self) -> Option<&SegmentHeader> {
        self.header.as_ref()
    }

    pub fn is_key_frame(&self) -> bool {
        self.header.map_or(self.key_by_name, |h| h.key_frame)
    }

    /// Assembled (or recovered) frame bytes, available once `Ready`.
    pub fn assembled_frame(&self) -> Option<&Bytes> {
        self.assembled.as_ref()
    }

    pub fn data_segments(&self) -> Option<u16> {
        self.n_data
    }

    pub fn parity_segments(&self) -> Option<u16> {
        self.n_parity
    }

    pub fn fetched_data(&self) -> usize {
        self.fetched.count()
    }

    pub fn fetched_parity(&self) -> usize {
        self.fetched_parity.count()
    }

    pub fn fetched_bytes(&self) -> usize {
        self.fetched_bytes
    }

    /// Delay from the first Interest to the last segment arrival.
    pub fn longest_drd(&self) -> Duration {
        match (self.first_request_ts, self.last_data_ts) {
            (Some(first), Some(last)) => last.duration_since(first),
            _ => Duration::ZERO,
        }
    }

    /// Delay from the first Interest to the first segment arrival.
    pub fn shortest_drd(&self) -> Duration {
        match (self.first_request_ts, self.first_data_ts) {
            (Some(first), Some(data)) => data.duration_since(first),
            _ => Duration::ZERO,
        }
    }

    /// Time between the first and the last segment arrival.
    pub fn assembling_time(&self) -> Duration {
        match (self.first_data_ts, self.last_data_ts) {
            (Some(first), Some(last)) => last.duration_since(first),
            _ => Duration::ZERO,
        }
    }
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("state", &self.state)
            .field("sample_no", &self.sample_no)
            .field("n_data", &self.n_data)
            .field("n_parity", &self.n_parity)
            .field("fetched_data", &self.fetched.count())
            .field("fetched_parity", &self.fetched_parity.count())
            .field("progress", &self.fetch_progress)
            .finish_non_exhaustive()
    }
}

fn common_sample(requests: &[DataRequest]) -> BufferResult<(Name, u64)> {
    let first = requests.first().ok_or(BufferError::InvalidRequestSet)?;
    if !first.info().is_sample() {
        return Err(BufferError::InvalidRequestSet);
    }
    let prefix = first.info().prefix(NameFilter::Sample);
    let sample_no = first.info().sample_no.ok_or(BufferError::InvalidRequestSet)?;
    for request in requests {
        let info = request.info();
        if !info.is_sample() || info.prefix(NameFilter::Sample) != prefix {
            return Err(BufferError::InvalidRequestSet);
        }
    }
    Ok((prefix, sample_no))
}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, BytesMut};
    use freshet_core::Name;
    use freshet_net::Interest;

    use super::*;
    use crate::fec::{MockFecDecoder, NoFec};

    const SAMPLE: &str = "/c/ndnrtc/v=4/video/s/t/d/seq=102";

    fn seg_uri(seg: u32) -> String {
        format!("{SAMPLE}/seg={seg}")
    }

    fn parity_uri(seg: u32) -> String {
        format!("{SAMPLE}/_parity/seg={seg}")
    }

    fn request_for(uri: &str) -> DataRequest {
        DataRequest::new(Interest::new(
            Name::from_uri(uri).unwrap(),
            Duration::from_secs(1),
        ))
        .unwrap()
    }

    fn header(n_data: u16, n_parity: u16, class: SegmentClass) -> SegmentHeader {
        SegmentHeader {
            class,
            key_frame: false,
            data_segments: n_data,
            parity_segments: n_parity,
            generation_delay_usec: 100,
            timestamp_ms: 3400,
        }
    }

    fn completed(uri: &str, n_data: u16, n_parity: u16, now: Instant) -> DataRequest {
        let mut request = request_for(uri);
        request.mark_expressed(now);
        let info = request.info().clone();
        let class = if info.is_parity {
            SegmentClass::Parity
        } else {
            SegmentClass::Data
        };
        let mut body = BytesMut::new();
        body.put_slice(format!("seg{}", info.seg_no.unwrap()).as_bytes());
        request.complete(body.freeze(), Some(header(n_data, n_parity, class)), now);
        request
    }

    fn failed(uri: &str, status: RequestStatus, now: Instant) -> DataRequest {
        let mut request = request_for(uri);
        request.mark_expressed(now);
        request.fail(status, now);
        request
    }

    fn slot() -> Slot {
        Slot::new(16_000, 3, Arc::new(NoFec))
    }

    fn slot_with_requests(segs: &[u32], now: Instant) -> Slot {
        let mut s = slot();
        let requests: Vec<_> = segs.iter().map(|&i| request_for(&seg_uri(i))).collect();
        s.set_requests(&requests, now).unwrap();
        s
    }

    #[tokio::test(start_paused = true)]
    async fn request_set_must_share_one_sample() {
        let mut s = slot();
        let now = Instant::now();
        assert_eq!(
            s.set_requests(&[], now),
            Err(BufferError::InvalidRequestSet)
        );

        let mixed = vec![
            request_for(&seg_uri(0)),
            request_for("/c/ndnrtc/v=4/video/s/t/d/seq=103/seg=0"),
        ];
        assert_eq!(
            s.set_requests(&mixed, now),
            Err(BufferError::InvalidRequestSet)
        );
        assert_eq!(s.state(), SlotState::Free);

        let sample_level = vec![DataRequest::new(Interest::new(
            Name::from_uri(SAMPLE).unwrap(),
            Duration::from_secs(1),
        ))
        .unwrap()];
        assert_eq!(
            s.set_requests(&sample_level, now),
            Err(BufferError::InvalidRequestSet)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn set_requests_twice_is_rejected() {
        let now = Instant::now();
        let mut s = slot_with_requests(&[0], now);
        assert_eq!(
            s.set_requests(&[request_for(&seg_uri(0))], now),
            Err(BufferError::SlotNotFree)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_walks_states_and_fires_ready_once() {
        let t0 = Instant::now();
        let mut s = slot_with_requests(&[0, 1, 2], t0);
        assert_eq!(s.state(), SlotState::New);

        let d0 = s.handle(&completed(&seg_uri(0), 3, 0, t0 + Duration::from_millis(20)), t0 + Duration::from_millis(20));
        assert!(!d0.ready && !d0.unfetchable);
        assert!(d0.need_data.is_empty());
        assert_eq!(s.state(), SlotState::Assembling);

        let d1 = s.handle(&completed(&seg_uri(1), 3, 0, t0 + Duration::from_millis(25)), t0 + Duration::from_millis(25));
        assert!(!d1.ready);
        assert!((s.fetch_progress() - 2.0 / 3.0).abs() < 1e-9);

        let d2 = s.handle(&completed(&seg_uri(2), 3, 0, t0 + Duration::from_millis(30)), t0 + Duration::from_millis(30));
        assert!(d2.ready);
        assert_eq!(s.state(), SlotState::Ready);
        assert_eq!(&s.assembled_frame().unwrap()[..], b"seg0seg1seg2");
        assert!(!s.recovered());
        assert_eq!(s.longest_drd(), Duration::from_millis(30));
        assert_eq!(s.shortest_drd(), Duration::from_millis(20));
        assert_eq!(s.assembling_time(), Duration::from_millis(10));
        assert_eq!(s.frame_meta().unwrap().timestamp_ms, 3400);
    }

    #[tokio::test(start_paused = true)]
    async fn under_estimation_requests_missing_segments() {
        let t0 = Instant::now();
        let mut s = slot_with_requests(&[0, 1], t0);

        let dispatch = s.handle(&completed(&seg_uri(0), 4, 0, t0), t0);
        assert_eq!(
            dispatch.need_data,
            vec![
                SegmentRef { seg_no: 2, parity: false },
                SegmentRef { seg_no: 3, parity: false }
            ]
        );

        s.add_requests(&[request_for(&seg_uri(2)), request_for(&seg_uri(3))])
            .unwrap();
        s.handle(&completed(&seg_uri(1), 4, 0, t0), t0);
        s.handle(&completed(&seg_uri(2), 4, 0, t0), t0);
        let last = s.handle(&completed(&seg_uri(3), 4, 0, t0), t0);
        assert!(last.ready);
        assert_eq!(s.fetched_data(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_triggers_bounded_retransmissions_then_unfetchable() {
        let t0 = Instant::now();
        let mut s = slot_with_requests(&[0], t0);

        for attempt in 1..=3u8 {
            let dispatch = s.handle(&failed(&seg_uri(0), RequestStatus::Timeout, t0), t0);
            assert_eq!(
                dispatch.need_data,
                vec![SegmentRef { seg_no: 0, parity: false }],
                "attempt {attempt} should re-request"
            );
            assert!(!dispatch.unfetchable);
            s.add_requests(&[request_for(&seg_uri(0))]).unwrap();
        }

        // Retry budget exhausted: the next failure settles the slot.
        let dispatch = s.handle(&failed(&seg_uri(0), RequestStatus::Timeout, t0), t0);
        assert!(dispatch.need_data.is_empty());
        assert!(dispatch.unfetchable);
        assert_eq!(s.state(), SlotState::Unfetchable);
    }

    #[tokio::test(start_paused = true)]
    async fn fec_recovery_after_data_requests_drain() {
        let t0 = Instant::now();
        let mut fec = MockFecDecoder::new();
        fec.expect_decode()
            .returning(|_, _, _| Some(Bytes::from_static(b"recovered-frame")));

        let mut s = Slot::new(16_000, 0, Arc::new(fec));
        let mut requests: Vec<_> = (0..5).map(|i| request_for(&seg_uri(i))).collect();
        requests.push(request_for(&parity_uri(0)));
        requests.push(request_for(&parity_uri(1)));
        s.set_requests(&requests, t0).unwrap();

        for seg in [0u32, 1, 2, 3] {
            let d = s.handle(&completed(&seg_uri(seg), 5, 2, t0), t0);
            assert!(!d.ready);
        }
        for seg in [0u32, 1] {
            let d = s.handle(&completed(&parity_uri(seg), 5, 2, t0), t0);
            // Coverage is sufficient but seg 4 is still in flight: no
            // recovery yet.
            assert!(!d.ready, "parity {seg} should not trigger early recovery");
        }

        let d = s.handle(&failed(&seg_uri(4), RequestStatus::Timeout, t0), t0);
        assert!(d.ready);
        assert!(s.recovered());
        assert_eq!(&s.assembled_frame().unwrap()[..], b"recovered-frame");
        assert_eq!(s.fetched_data(), 4);
        assert_eq!(s.fetched_parity(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn all_failures_without_geometry_become_unfetchable() {
        let t0 = Instant::now();
        let mut s = Slot::new(16_000, 0, Arc::new(NoFec));
        s.set_requests(&[request_for(&seg_uri(0)), request_for(&seg_uri(1))], t0)
            .unwrap();

        let d0 = s.handle(&failed(&seg_uri(0), RequestStatus::Timeout, t0), t0);
        assert!(!d0.unfetchable);
        let d1 = s.handle(&failed(&seg_uri(1), RequestStatus::NetworkNack, t0), t0);
        assert!(d1.unfetchable);
        assert_eq!(s.state(), SlotState::Unfetchable);
    }

    #[rstest::rstest]
    #[case(RequestStatus::Timeout)]
    #[case(RequestStatus::NetworkNack)]
    #[case(RequestStatus::AppNack)]
    #[tokio::test(start_paused = true)]
    async fn every_failure_kind_spends_the_retry_budget(#[case] status: RequestStatus) {
        let t0 = Instant::now();
        let mut s = slot_with_requests(&[0], t0);
        let dispatch = s.handle(&failed(&seg_uri(0), status, t0), t0);
        assert_eq!(
            dispatch.need_data,
            vec![SegmentRef { seg_no: 0, parity: false }]
        );
        assert!(!dispatch.unfetchable);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_requests_do_not_retry() {
        let t0 = Instant::now();
        let mut s = slot_with_requests(&[0], t0);
        let dispatch = s.handle(&failed(&seg_uri(0), RequestStatus::Cancelled, t0), t0);
        assert!(dispatch.need_data.is_empty());
        assert!(dispatch.unfetchable);
    }

    #[tokio::test(start_paused = true)]
    async fn late_segment_after_unfetchable_is_dropped() {
        let t0 = Instant::now();
        let mut s = Slot::new(16_000, 0, Arc::new(NoFec));
        s.set_requests(&[request_for(&seg_uri(0))], t0).unwrap();
        let d = s.handle(&failed(&seg_uri(0), RequestStatus::Timeout, t0), t0);
        assert!(d.unfetchable);

        let late = s.handle(&completed(&seg_uri(0), 1, 0, t0), t0);
        assert!(!late.ready && !late.unfetchable && late.need_data.is_empty());
        assert_eq!(s.state(), SlotState::Unfetchable);
        assert_eq!(s.fetched_data(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn over_estimated_requests_do_not_block_readiness() {
        // Estimate said 3 segments, the frame actually has 2.
        let t0 = Instant::now();
        let mut s = slot_with_requests(&[0, 1, 2], t0);
        s.handle(&completed(&seg_uri(0), 2, 0, t0), t0);
        let d = s.handle(&completed(&seg_uri(1), 2, 0, t0), t0);
        assert!(d.ready);
        assert_eq!(s.state(), SlotState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_resets_for_reuse() {
        let t0 = Instant::now();
        let mut s = slot_with_requests(&[0], t0);
        let d = s.handle(&completed(&seg_uri(0), 1, 0, t0), t0);
        assert!(d.ready);
        s.lock();
        assert_eq!(s.state(), SlotState::Locked);

        s.clear();
        assert_eq!(s.state(), SlotState::Free);
        assert_eq!(s.fetch_progress(), 0.0);
        assert!(s.assembled_frame().is_none());
        assert!(s.frame_meta().is_none());

        // The cleared slot accepts a fresh acquisition and can become
        // ready again (the once-per-acquisition guards were reset).
        s.set_requests(&[request_for(&seg_uri(0))], t0).unwrap();
        let d = s.handle(&completed(&seg_uri(0), 1, 0, t0), t0);
        assert!(d.ready);
    }

    #[tokio::test(start_paused = true)]
    async fn progress_is_monotone() {
        let t0 = Instant::now();
        let mut s = slot_with_requests(&[0, 1, 2], t0);
        let mut last = s.fetch_progress();
        for seg in [2u32, 0, 1] {
            s.handle(&completed(&seg_uri(seg), 3, 0, t0), t0);
            assert!(s.fetch_progress() >= last);
            last = s.fetch_progress();
        }
        assert_eq!(last, 1.0);
    }
}
