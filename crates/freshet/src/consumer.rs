#![forbid(unsafe_code)]

use std::{sync::Arc, time::Duration};

use freshet_buffer::{Buffer, BufferEvent, FecDecoder, NoFec, SlotPool, XorParityFec};
use freshet_core::{markers, LiveMeta, Name, NameFilter};
use freshet_events::{EventBus, FetchEvent, NetEvent, PlaybackEvent};
use freshet_net::{DataRequest, Face, Interest, RequestQueue, RequestStatus, Verifier};
use freshet_pipeline::{Pipeline, PipelineController, Pulse, PulseDecision};
use freshet_play::{Ingest, PlaybackQueue};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    bootstrap::bootstrap,
    error::{ConsumerError, ConsumerResult},
    options::ConsumerOptions,
    sink::{FrameOut, FrameSink},
};

/// The consumer-side fetching engine.
///
/// One task owns every mutable component; the request queue's expression
/// tasks are the only concurrency, and they communicate back through the
/// completion stream. Control flow follows the ready/unfetchable signals:
/// every settled frame frees a pipeline seat, which immediately pulses
/// the next sample.
pub struct Consumer {
    options: ConsumerOptions,
    face: Arc<dyn Face>,
    verifier: Arc<dyn Verifier>,
    fec: Arc<dyn FecDecoder>,
    events: EventBus,
}

impl Consumer {
    pub fn new(options: ConsumerOptions, face: Arc<dyn Face>, verifier: Arc<dyn Verifier>) -> Self {
        let fec: Arc<dyn FecDecoder> = if options.use_fec {
            Arc::new(XorParityFec)
        } else {
            Arc::new(NoFec)
        };
        let events = EventBus::new(options.event_capacity);
        Self {
            options,
            face,
            verifier,
            fec,
            events,
        }
    }

    /// Swap in a different FEC implementation.
    pub fn with_fec(mut self, fec: Arc<dyn FecDecoder>) -> Self {
        self.fec = fec;
        self
    }

    /// Handle for subscribing to consumer events.
    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    /// Bootstrap and fetch until cancelled. Released frames go to `sink`
    /// in decode order.
    pub async fn run(
        self,
        sink: &mut dyn FrameSink,
        cancel: CancellationToken,
    ) -> ConsumerResult<()> {
        if self.options.prefix.thread_name.is_none() {
            return Err(ConsumerError::Config(
                "stream prefix must name a thread".into(),
            ));
        }

        let (mut queue, mut completions) = RequestQueue::new(
            Arc::clone(&self.face),
            Arc::clone(&self.verifier),
            cancel.clone(),
        );
        let boot = bootstrap(
            &mut queue,
            &mut completions,
            &self.options.prefix,
            self.options.interest_lifetime,
        )
        .await?;
        info!(
            prefix = %self.options.prefix.prefix(NameFilter::Thread),
            framerate = boot.live.framerate,
            start_sample = boot.start_sample,
            window = boot.initial_window,
            "fetching"
        );

        let mut engine = Engine::new(&self.options, &boot, Arc::clone(&self.fec), self.events.clone());
        engine.fill_pulses(&mut queue);

        let mut play_timer = interval_at(Instant::now() + boot.sample_period, boot.sample_period);
        let mut live_timer = interval_at(
            Instant::now() + self.options.live_refresh,
            self.options.live_refresh,
        );
        live_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    engine.shutdown();
                    info!("consumer stopped");
                    return Ok(());
                }
                raw = completions.recv() => {
                    if let Some(done) = queue.finalize(raw?) {
                        engine.on_completion(&mut queue, &done);
                    }
                }
                _ = play_timer.tick() => engine.on_play_tick(&mut queue, sink),
                _ = live_timer.tick() => engine.refresh_live(&mut queue),
            }
        }
    }
}

/// Mutable engine state, all owned by the run loop.
struct Engine {
    pool: SlotPool,
    buffer: Buffer,
    pipeline: Pipeline,
    control: PipelineController,
    playback: PlaybackQueue,
    live: LiveMeta,
    stream_prefix: Name,
    sample_period: Duration,
    lifetime: Duration,
    adaptive: bool,
    events: EventBus,
}

impl Engine {
    fn new(
        options: &ConsumerOptions,
        boot: &crate::bootstrap::BootstrapInfo,
        fec: Arc<dyn FecDecoder>,
        events: EventBus,
    ) -> Self {
        let pool = SlotPool::new(
            options.pool_capacity,
            options.payload_capacity,
            options.max_retx,
            fec,
        );
        let pipeline = Pipeline::new(
            options.prefix.prefix(NameFilter::Thread),
            boot.start_sample,
            options.pipeline_step,
            options.interest_lifetime,
            options.use_fec,
        );
        let window = options.pipeline_size.unwrap_or(boot.initial_window);
        Self {
            pool,
            buffer: Buffer::new(options.delay_theta, options.delay_gamma),
            pipeline,
            control: PipelineController::new(window, options.pipeline_size.is_none()),
            playback: PlaybackQueue::new(boot.sample_period),
            live: boot.live,
            stream_prefix: options.prefix.prefix(NameFilter::Stream),
            sample_period: boot.sample_period,
            lifetime: options.interest_lifetime,
            adaptive: options.pipeline_size.is_none(),
            events,
        }
    }

    /// Pulse until the window is full or the pool runs dry.
    fn fill_pulses(&mut self, queue: &mut RequestQueue) {
        let now = Instant::now();
        while self.control.grant() == PulseDecision::Granted {
            match self.pipeline.pulse(&self.live, &mut self.pool, now) {
                Pulse::Slot { slot, requests } => match self.buffer.adopt(slot) {
                    Ok(()) => queue.enqueue(requests),
                    Err((err, slot)) => {
                        warn!(%err, sample = slot.sample_no(), "slot rejected by buffer");
                        self.pool.push(slot);
                        self.control.revert();
                        break;
                    }
                },
                Pulse::Skipped => {
                    self.control.revert();
                    self.events.publish(FetchEvent::PulseSkipped {
                        sample_no: self.pipeline.next_sample(),
                    });
                    break;
                }
            }
        }
    }

    fn on_completion(&mut self, queue: &mut RequestQueue, done: &DataRequest) {
        let info = done.info();
        if info.is_sample() {
            let now = Instant::now();
            for event in self.buffer.dispatch(done, now) {
                match event {
                    BufferEvent::NeedData {
                        sample_no,
                        segments,
                    } => {
                        let sample_prefix = info.prefix(NameFilter::Sample);
                        match Pipeline::requests_for_segments(
                            &sample_prefix,
                            &segments,
                            self.lifetime,
                        ) {
                            Ok(requests) => {
                                if let Err(err) = self.buffer.add_requests(sample_no, &requests) {
                                    warn!(%err, sample = sample_no, "dropping follow-up requests");
                                    continue;
                                }
                                trace!(sample = sample_no, count = requests.len(), "re-requesting");
                                queue.enqueue(requests);
                            }
                            Err(err) => warn!(%err, sample = sample_no, "bad follow-up request"),
                        }
                    }
                    BufferEvent::SlotReady { sample_no } => {
                        self.on_slot_ready(queue, sample_no, now);
                    }
                    BufferEvent::SlotUnfetchable { sample_no } => {
                        self.control.complete();
                        self.events
                            .publish(FetchEvent::SlotUnfetchable { sample_no });
                        if let Some(slot) = self.buffer.take(sample_no) {
                            self.pool.push(slot);
                        }
                        self.fill_pulses(queue);
                    }
                }
            }
        } else if info.is_live {
            if done.status() == RequestStatus::Data {
                let mut payload = done.payload().cloned().unwrap_or_default();
                match LiveMeta::decode(&mut payload) {
                    Ok(meta) => {
                        trace!(
                            segnum = meta.segnum_estimate,
                            framerate = meta.framerate,
                            "live meta refreshed"
                        );
                        self.live = meta;
                    }
                    Err(err) => warn!(%err, "malformed live meta refresh"),
                }
            } else {
                debug!(status = ?done.status(), "live refresh unanswered");
            }
        }
    }

    fn on_slot_ready(&mut self, queue: &mut RequestQueue, sample_no: u64, now: Instant) {
        self.control.complete();

        let jitter = queue.jitter_estimate();
        let delay = self.buffer.delay_estimate(jitter);
        if self.adaptive {
            let before = self.control.window();
            self.control.adapt(delay, self.sample_period);
            if self.control.window() != before {
                self.events.publish(FetchEvent::WindowChanged {
                    window: self.control.window(),
                });
            }
        }
        self.playback.set_target_delay(delay);
        if let Some(drd) = queue.drd_estimate() {
            self.events.publish(NetEvent::Estimates { drd, jitter });
        }

        if let Some(slot) = self.buffer.take(sample_no) {
            self.events.publish(FetchEvent::SlotReady {
                sample_no,
                assembly: slot.longest_drd(),
                recovered: slot.recovered(),
            });
            match self.playback.ingest(slot, now) {
                Ingest::Queued => {}
                Ingest::Late(slot) => {
                    self.events
                        .publish(PlaybackEvent::LateArrival { sample_no });
                    self.pool.push(slot);
                }
            }
        }
        self.fill_pulses(queue);
    }

    fn on_play_tick(&mut self, queue: &mut RequestQueue, sink: &mut dyn FrameSink) {
        let now = Instant::now();
        if let Some((slot, _play_time)) = self.playback.pop(now) {
            let frame = FrameOut {
                sample_no: slot.sample_no(),
                timestamp_ms: slot.frame_meta().map_or(0, |h| h.timestamp_ms),
                key_frame: slot.is_key_frame(),
                recovered: slot.recovered(),
                bytes: slot.assembled_frame().cloned().unwrap_or_default(),
            };
            self.events.publish(PlaybackEvent::FrameReleased {
                sample_no: frame.sample_no,
                timestamp_ms: frame.timestamp_ms,
            });
            sink.frame(frame);
            self.pool.push(slot);
            // The returned slot may unblock a previously skipped pulse.
            self.fill_pulses(queue);
        }
    }

    fn refresh_live(&mut self, queue: &mut RequestQueue) {
        let name = self.stream_prefix.clone().with_str(markers::LIVE);
        match DataRequest::new(Interest::fresh(name, self.lifetime)) {
            Ok(request) => queue.enqueue_one(request),
            Err(err) => warn!(%err, "live refresh request rejected"),
        }
    }

    /// Return every held slot to the pool on shutdown. Frames still
    /// assembling surface as unfetchable.
    fn shutdown(&mut self) {
        for slot in self.buffer.drain() {
            self.events.publish(FetchEvent::SlotUnfetchable {
                sample_no: slot.sample_no(),
            });
            self.pool.push(slot);
        }
        for slot in self.playback.drain() {
            self.pool.push(slot);
        }
        debug_assert_eq!(self.pool.free(), self.pool.capacity());
        debug!(capacity = self.pool.capacity(), "slot pool drained");
    }
}
