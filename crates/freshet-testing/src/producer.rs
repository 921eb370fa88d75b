#![forbid(unsafe_code)]

use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use freshet_core::{
    LatestPointer, LiveMeta, Name, NamespaceInfo, SegmentClass, SegmentHeader, StreamMeta,
};
use freshet_net::{Data, Face, FaceError, Interest};
use tokio::time::Instant;

#[derive(Clone, Debug)]
pub struct SimProducerOptions {
    pub framerate: f64,
    pub gop_size: u32,
    pub data_segments: u16,
    pub parity_segments: u16,
    pub segment_bytes: usize,
    /// One-way network latency applied to both directions.
    pub latency: Duration,
    pub start_sample: u64,
}

impl Default for SimProducerOptions {
    fn default() -> Self {
        Self {
            framerate: 30.0,
            gop_size: 30,
            data_segments: 3,
            parity_segments: 1,
            segment_bytes: 1_200,
            latency: Duration::from_millis(20),
            start_sample: 100,
        }
    }
}

/// Deterministic in-process producer.
///
/// Publishes a synthetic live stream under the configured thread prefix:
/// `_live`, `_latest` and `_meta` answer immediately, sample segments are
/// produced at the nominal framerate (Interests ahead of the live head
/// wait in the producer until their frame exists, like a real producer's
/// pending-Interest table). Parity segments carry the XOR of the frame's
/// padded data segments, so XOR FEC recovery works end to end.
pub struct SimProducerFace {
    opts: SimProducerOptions,
    epoch: Instant,
}

impl SimProducerFace {
    pub fn new(opts: SimProducerOptions) -> Self {
        Self {
            opts,
            epoch: Instant::now(),
        }
    }

    fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.opts.framerate)
    }

    fn current_sample(&self, now: Instant) -> u64 {
        let elapsed = now.duration_since(self.epoch).as_secs_f64();
        self.opts.start_sample + (elapsed * self.opts.framerate) as u64
    }

    fn timestamp_ms(&self, sample: u64) -> u64 {
        (sample as f64 * 1000.0 / self.opts.framerate) as u64
    }

    fn data_body(&self, sample: u64, seg: u16) -> Vec<u8> {
        (0..self.opts.segment_bytes)
            .map(|i| (sample as usize + seg as usize * 31 + i) as u8)
            .collect()
    }

    fn parity_body(&self, sample: u64) -> Vec<u8> {
        let mut parity = vec![0u8; self.opts.segment_bytes];
        for seg in 0..self.opts.data_segments {
            for (out, byte) in parity.iter_mut().zip(self.data_body(sample, seg)) {
                *out ^= byte;
            }
        }
        parity
    }

    async fn answer_sample(&self, info: &NamespaceInfo, name: Name) -> Result<Data, FaceError> {
        let sample = info.sample_no.expect("sample name");
        let Some(seg) = info.seg_no else {
            return Ok(Data::app_nack(name));
        };

        let limit = if info.is_parity {
            u64::from(self.opts.parity_segments)
        } else {
            u64::from(self.opts.data_segments)
        };
        if seg >= limit {
            return Ok(Data::app_nack(name));
        }

        // Wait for the frame to be produced if the Interest is early.
        let now = Instant::now();
        let current = self.current_sample(now);
        let mut generation_delay_usec = 0u32;
        if sample > current {
            let wait = self.period().mul_f64((sample - current) as f64);
            tokio::time::sleep(wait).await;
            generation_delay_usec = wait.as_micros().min(u128::from(u32::MAX)) as u32;
            generation_delay_usec = generation_delay_usec.max(1);
        }

        let header = SegmentHeader {
            class: if info.is_parity {
                SegmentClass::Parity
            } else {
                SegmentClass::Data
            },
            key_frame: self.opts.gop_size > 0 && sample % u64::from(self.opts.gop_size) == 0,
            data_segments: self.opts.data_segments,
            parity_segments: self.opts.parity_segments,
            generation_delay_usec,
            timestamp_ms: self.timestamp_ms(sample),
        };
        let body = if info.is_parity {
            self.parity_body(sample)
        } else {
            self.data_body(sample, seg as u16)
        };
        let mut payload = BytesMut::with_capacity(SegmentHeader::SIZE + body.len());
        header.encode(&mut payload);
        payload.put_slice(&body);
        Ok(Data::blob(name, payload.freeze()))
    }
}

#[async_trait]
impl Face for SimProducerFace {
    async fn express(&self, interest: &Interest) -> Result<Data, FaceError> {
        tokio::time::sleep(self.opts.latency).await;

        let info = NamespaceInfo::parse(&interest.name)
            .map_err(|err| FaceError::Nack(format!("unroutable name: {err}")))?;
        let name = interest.name.clone();

        let reply = if info.is_live {
            let meta = LiveMeta {
                framerate: self.opts.framerate,
                gop_size: self.opts.gop_size,
                segnum_estimate: u32::from(self.opts.data_segments),
                parity_segnum_estimate: u32::from(self.opts.parity_segments),
                timestamp_ms: self.timestamp_ms(self.current_sample(Instant::now())),
            };
            let mut payload = BytesMut::new();
            meta.encode(&mut payload);
            Ok(Data::blob(name, payload.freeze()))
        } else if info.is_latest {
            let pointer = LatestPointer {
                delegations: vec![info
                    .prefix(freshet_core::NameFilter::Thread)
                    .with_str("d")
                    .with(freshet_core::Component::Sequence(
                        self.current_sample(Instant::now()),
                    ))],
            };
            let mut payload = BytesMut::new();
            pointer.encode(&mut payload);
            Ok(Data::blob(name, payload.freeze()))
        } else if info.is_meta {
            let meta = StreamMeta {
                width: 1280,
                height: 720,
                bitrate_kbps: 1_500,
                codec: "vp8".to_string(),
            };
            let mut payload = BytesMut::new();
            meta.encode(&mut payload);
            Ok(Data::blob(name, payload.freeze()))
        } else if info.is_sample() {
            self.answer_sample(&info, name).await
        } else {
            Ok(Data::app_nack(name))
        };

        tokio::time::sleep(self.opts.latency).await;
        reply
    }
}
