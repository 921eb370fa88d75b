#![forbid(unsafe_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use thiserror::Error;
use tokio::{
    sync::mpsc,
    time::{timeout, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    estimators::{Ewma, WindowedDeviation},
    face::{ContentType, Data, Face, FaceError, Verifier},
    request::{DataRequest, RequestStatus},
};

#[derive(Debug, Error)]
pub enum NetError {
    #[error("request queue closed")]
    Closed,
}

pub type NetResult<T> = Result<T, NetError>;

/// Weight of the previous DRD estimate when a new sample arrives.
const DRD_ALPHA: f64 = 0.9;
/// Window over which network jitter is measured.
const JITTER_WINDOW: Duration = Duration::from_secs(30);

enum RawOutcome {
    Reply(Data),
    Failed(FaceError),
    Cancelled,
}

/// Opaque completion token produced by an expression task. Feed it back
/// into [`RequestQueue::finalize`] to settle the request.
pub struct RawCompletion {
    id: u64,
    outcome: RawOutcome,
}

/// Receiving half of the queue: yields completion tokens as expression
/// tasks finish. Split from the queue state so the owner can `select!`
/// over it while still mutating the queue from other arms.
pub struct CompletionStream {
    rx: mpsc::UnboundedReceiver<RawCompletion>,
}

impl CompletionStream {
    pub async fn recv(&mut self) -> NetResult<RawCompletion> {
        self.rx.recv().await.ok_or(NetError::Closed)
    }
}

/// Expresses Interests and accounts for their completions.
///
/// `enqueue` spawns one expression task per request; each task races the
/// face against the Interest lifetime and the cancellation token and
/// posts a [`RawCompletion`]. The owner drains the [`CompletionStream`]
/// and hands tokens to [`finalize`], which is where verification, header
/// decoding and estimator updates happen, so all queue state stays on
/// the draining task.
///
/// [`finalize`]: RequestQueue::finalize
pub struct RequestQueue {
    face: Arc<dyn Face>,
    verifier: Arc<dyn Verifier>,
    cancel: CancellationToken,
    raw_tx: mpsc::UnboundedSender<RawCompletion>,
    inflight: HashMap<u64, DataRequest>,
    /// Issue order of outstanding requests per sample, for out-of-order
    /// reply accounting.
    sample_order: HashMap<u64, VecDeque<u64>>,
    drd: Ewma,
    jitter: WindowedDeviation,
    out_of_order: u64,
    next_id: u64,
}

impl RequestQueue {
    pub fn new(
        face: Arc<dyn Face>,
        verifier: Arc<dyn Verifier>,
        cancel: CancellationToken,
    ) -> (Self, CompletionStream) {
        let (raw_tx, rx) = mpsc::unbounded_channel();
        let queue = Self {
            face,
            verifier,
            cancel,
            raw_tx,
            inflight: HashMap::new(),
            sample_order: HashMap::new(),
            drd: Ewma::new(DRD_ALPHA),
            jitter: WindowedDeviation::new(JITTER_WINDOW),
            out_of_order: 0,
            next_id: 0,
        };
        (queue, CompletionStream { rx })
    }

    /// Express every request in order. Each transitions
    /// `Created → Expressed` and is stamped with the expression time.
    pub fn enqueue(&mut self, requests: Vec<DataRequest>) {
        let now = Instant::now();
        for mut request in requests {
            let id = self.next_id;
            self.next_id += 1;
            request.mark_expressed(now);

            if request.info().is_sample() {
                if let Some(sample) = request.info().sample_no {
                    self.sample_order.entry(sample).or_default().push_back(id);
                }
            }

            trace!(id, name = %request.interest().name, "expressing interest");
            let face = Arc::clone(&self.face);
            let cancel = self.cancel.clone();
            let tx = self.raw_tx.clone();
            let interest = request.interest().clone();
            self.inflight.insert(id, request);

            tokio::spawn(async move {
                let outcome = tokio::select! {
                    () = cancel.cancelled() => RawOutcome::Cancelled,
                    res = timeout(interest.lifetime, face.express(&interest)) => match res {
                        Ok(Ok(data)) => RawOutcome::Reply(data),
                        Ok(Err(err)) => RawOutcome::Failed(err),
                        Err(_) => RawOutcome::Failed(FaceError::Timeout),
                    },
                };
                let _ = tx.send(RawCompletion { id, outcome });
            });
        }
    }

    pub fn enqueue_one(&mut self, request: DataRequest) {
        self.enqueue(vec![request]);
    }

    /// Settle one completion token: verify, decode the segment header,
    /// update the estimators, fix the terminal status. Returns `None` for
    /// tokens whose request is no longer known.
    pub fn finalize(&mut self, raw: RawCompletion) -> Option<DataRequest> {
        let Some(mut request) = self.inflight.remove(&raw.id) else {
            warn!(id = raw.id, "completion for unknown request");
            return None;
        };
        let now = Instant::now();

        let was_front = self.settle_order(&request, raw.id);

        match raw.outcome {
            RawOutcome::Cancelled => request.fail(RequestStatus::Cancelled, now),
            RawOutcome::Failed(FaceError::Timeout) => {
                request.fail(RequestStatus::Timeout, now);
            }
            RawOutcome::Failed(FaceError::Nack(reason)) => {
                debug!(name = %request.interest().name, reason, "network nack");
                request.fail(RequestStatus::NetworkNack, now);
            }
            RawOutcome::Failed(FaceError::Transport(reason)) => {
                warn!(name = %request.interest().name, reason, "transport failure");
                request.fail(RequestStatus::NetworkNack, now);
            }
            RawOutcome::Reply(data) => {
                self.settle_reply(&mut request, data, now);
                if request.status() == RequestStatus::Data && !was_front {
                    self.out_of_order += 1;
                }
            }
        }

        Some(request)
    }

    fn settle_reply(&mut self, request: &mut DataRequest, data: Data, now: Instant) {
        if !data.name.starts_with(&request.interest().name) {
            warn!(
                interest = %request.interest().name,
                data = %data.name,
                "reply name does not match interest"
            );
            request.fail(RequestStatus::AppNack, now);
            return;
        }
        if data.content_type == ContentType::Nack {
            request.fail(RequestStatus::AppNack, now);
            return;
        }
        if !self.verifier.verify(&data) {
            debug!(name = %data.name, "signature verification failed");
            request.fail(RequestStatus::AppNack, now);
            return;
        }

        if request.info().is_sample() {
            match freshet_core::SegmentHeader::split(&data.payload) {
                Ok((header, body)) => request.complete(body, Some(header), now),
                Err(err) => {
                    warn!(name = %data.name, %err, "malformed segment payload");
                    request.fail(RequestStatus::AppNack, now);
                    return;
                }
            }
        } else {
            request.complete(data.payload, None, now);
        }

        if request.is_original() {
            if let Some(drd) = request.drd() {
                let drd_ms = drd.as_secs_f64() * 1000.0;
                self.drd.push(drd_ms);
                self.jitter.push(now, drd_ms);
            }
        }
    }

    /// Drop the request from its sample's issue-order queue; report
    /// whether it was the oldest outstanding one.
    fn settle_order(&mut self, request: &DataRequest, id: u64) -> bool {
        let Some(sample) = request.info().sample_no.filter(|_| request.info().is_sample()) else {
            return true;
        };
        let Some(order) = self.sample_order.get_mut(&sample) else {
            return true;
        };
        let was_front = order.front() == Some(&id);
        order.retain(|&pending| pending != id);
        if order.is_empty() {
            self.sample_order.remove(&sample);
        }
        was_front
    }

    /// Smoothed data-retrieval delay over original replies.
    pub fn drd_estimate(&self) -> Option<Duration> {
        self.drd.value().map(|ms| Duration::from_secs_f64(ms / 1000.0))
    }

    /// Network jitter: mean absolute DRD deviation over the last 30 s.
    pub fn jitter_estimate(&self) -> Duration {
        Duration::from_secs_f64(self.jitter.deviation() / 1000.0)
    }

    /// Replies that arrived while an older request for the same sample
    /// was still outstanding.
    pub fn out_of_order(&self) -> u64 {
        self.out_of_order
    }

    pub fn pending(&self) -> usize {
        self.inflight.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::{BufMut, Bytes, BytesMut};
    use freshet_core::{Name, SegmentClass, SegmentHeader};

    use super::*;
    use crate::face::Interest;

    enum Script {
        Reply { data: Data, delay: Duration },
        Fail { error: FaceError, delay: Duration },
        Hang,
    }

    #[derive(Default)]
    struct ScriptedFace {
        scripts: Mutex<HashMap<String, Script>>,
    }

    impl ScriptedFace {
        fn on(&self, name: &str, script: Script) {
            self.scripts.lock().unwrap().insert(name.to_string(), script);
        }
    }

    #[async_trait]
    impl Face for ScriptedFace {
        async fn express(&self, interest: &Interest) -> Result<Data, FaceError> {
            let script = self.scripts.lock().unwrap().remove(&interest.name.to_string());
            match script {
                Some(Script::Reply { data, delay }) => {
                    tokio::time::sleep(delay).await;
                    Ok(data)
                }
                Some(Script::Fail { error, delay }) => {
                    tokio::time::sleep(delay).await;
                    Err(error)
                }
                Some(Script::Hang) | None => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }
    }

    struct RejectAll;

    impl Verifier for RejectAll {
        fn verify(&self, _data: &Data) -> bool {
            false
        }
    }

    fn segment_payload(generation_delay_usec: u32) -> Bytes {
        let header = SegmentHeader {
            class: SegmentClass::Data,
            key_frame: false,
            data_segments: 1,
            parity_segments: 0,
            generation_delay_usec,
            timestamp_ms: 42,
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        buf.put_slice(b"frame");
        buf.freeze()
    }

    fn seg_request(uri: &str, lifetime: Duration) -> DataRequest {
        DataRequest::new(Interest::new(Name::from_uri(uri).unwrap(), lifetime)).unwrap()
    }

    fn queue_with(face: Arc<ScriptedFace>) -> (RequestQueue, CompletionStream) {
        RequestQueue::new(face, Arc::new(crate::face::AcceptAll), CancellationToken::new())
    }

    async fn next(queue: &mut RequestQueue, stream: &mut CompletionStream) -> DataRequest {
        let raw = stream.recv().await.unwrap();
        queue.finalize(raw).unwrap()
    }

    const SEG0: &str = "/c/ndnrtc/v=4/video/s/t/d/seq=1/seg=0";
    const SEG1: &str = "/c/ndnrtc/v=4/video/s/t/d/seq=1/seg=1";

    #[tokio::test(start_paused = true)]
    async fn data_reply_decodes_header_and_samples_drd() {
        let face = Arc::new(ScriptedFace::default());
        face.on(
            SEG0,
            Script::Reply {
                data: Data::blob(Name::from_uri(SEG0).unwrap(), segment_payload(2_000)),
                delay: Duration::from_millis(40),
            },
        );
        let (mut queue, mut completions) = queue_with(face);
        queue.enqueue_one(seg_request(SEG0, Duration::from_secs(1)));

        let done = next(&mut queue, &mut completions).await;
        assert_eq!(done.status(), RequestStatus::Data);
        assert_eq!(done.header().unwrap().data_segments, 1);
        assert_eq!(&done.payload().unwrap()[..], b"frame");
        let drd = queue.drd_estimate().unwrap();
        assert_eq!(drd.as_millis(), 38); // 40ms rtt - 2ms generation delay
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn lifetime_elapsing_is_a_timeout() {
        let face = Arc::new(ScriptedFace::default());
        face.on(SEG0, Script::Hang);
        let (mut queue, mut completions) = queue_with(face);
        queue.enqueue_one(seg_request(SEG0, Duration::from_millis(100)));

        let done = next(&mut queue, &mut completions).await;
        assert_eq!(done.status(), RequestStatus::Timeout);
        assert!(queue.drd_estimate().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn network_nack_is_terminal() {
        let face = Arc::new(ScriptedFace::default());
        face.on(
            SEG0,
            Script::Fail {
                error: FaceError::Nack("no route".into()),
                delay: Duration::from_millis(5),
            },
        );
        let (mut queue, mut completions) = queue_with(face);
        queue.enqueue_one(seg_request(SEG0, Duration::from_secs(1)));

        let done = next(&mut queue, &mut completions).await;
        assert_eq!(done.status(), RequestStatus::NetworkNack);
    }

    #[tokio::test(start_paused = true)]
    async fn verification_failure_becomes_app_nack() {
        let face = Arc::new(ScriptedFace::default());
        face.on(
            SEG0,
            Script::Reply {
                data: Data::blob(Name::from_uri(SEG0).unwrap(), segment_payload(0)),
                delay: Duration::from_millis(1),
            },
        );
        let (mut queue, mut completions) =
            RequestQueue::new(face, Arc::new(RejectAll), CancellationToken::new());
        queue.enqueue_one(seg_request(SEG0, Duration::from_secs(1)));

        let done = next(&mut queue, &mut completions).await;
        assert_eq!(done.status(), RequestStatus::AppNack);
        assert!(done.payload().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_payload_becomes_app_nack() {
        let face = Arc::new(ScriptedFace::default());
        face.on(
            SEG0,
            Script::Reply {
                data: Data::blob(Name::from_uri(SEG0).unwrap(), Bytes::from_static(b"xx")),
                delay: Duration::from_millis(1),
            },
        );
        let (mut queue, mut completions) = queue_with(face);
        queue.enqueue_one(seg_request(SEG0, Duration::from_secs(1)));

        let done = next(&mut queue, &mut completions).await;
        assert_eq!(done.status(), RequestStatus::AppNack);
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_order_reply_is_counted() {
        let face = Arc::new(ScriptedFace::default());
        face.on(
            SEG0,
            Script::Reply {
                data: Data::blob(Name::from_uri(SEG0).unwrap(), segment_payload(0)),
                delay: Duration::from_millis(50),
            },
        );
        face.on(
            SEG1,
            Script::Reply {
                data: Data::blob(Name::from_uri(SEG1).unwrap(), segment_payload(0)),
                delay: Duration::from_millis(5),
            },
        );
        let (mut queue, mut completions) = queue_with(face);
        queue.enqueue(vec![
            seg_request(SEG0, Duration::from_secs(1)),
            seg_request(SEG1, Duration::from_secs(1)),
        ]);

        // seg=1 answers first even though seg=0 was issued before it.
        let first = next(&mut queue, &mut completions).await;
        assert_eq!(first.info().seg_no, Some(1));
        assert_eq!(queue.out_of_order(), 1);

        let second = next(&mut queue, &mut completions).await;
        assert_eq!(second.info().seg_no, Some(0));
        assert_eq!(queue.out_of_order(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_settles_inflight_as_cancelled() {
        let face = Arc::new(ScriptedFace::default());
        face.on(SEG0, Script::Hang);
        let cancel = CancellationToken::new();
        let (mut queue, mut completions) =
            RequestQueue::new(face, Arc::new(crate::face::AcceptAll), cancel.clone());
        queue.enqueue_one(seg_request(SEG0, Duration::from_secs(30)));

        cancel.cancel();
        let done = next(&mut queue, &mut completions).await;
        assert_eq!(done.status(), RequestStatus::Cancelled);
    }
}
