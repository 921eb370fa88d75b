#![forbid(unsafe_code)]

use bytes::{Buf, BufMut, Bytes};

use crate::{
    error::{ParseError, ParseResult},
    name::{Component, Name},
};

fn need(buf: &impl Buf, n: usize) -> ParseResult<()> {
    if buf.remaining() < n {
        return Err(ParseError::Truncated {
            need: n,
            have: buf.remaining(),
        });
    }
    Ok(())
}

/// Class of a media segment, carried in its per-segment header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentClass {
    Data,
    Parity,
    Meta,
    Manifest,
}

impl SegmentClass {
    fn from_u8(value: u8) -> ParseResult<Self> {
        match value {
            0 => Ok(Self::Data),
            1 => Ok(Self::Parity),
            2 => Ok(Self::Meta),
            3 => Ok(Self::Manifest),
            _ => Err(ParseError::BadField("segment class")),
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Data => 0,
            Self::Parity => 1,
            Self::Meta => 2,
            Self::Manifest => 3,
        }
    }
}

/// Header prepended to every media-segment payload.
///
/// `data_segments`/`parity_segments` tell the consumer how large the whole
/// frame is; `generation_delay_usec` is the producer-side delay between
/// Interest arrival and Data emission (zero for cache hits), and
/// `timestamp_ms` is the frame's decode timestamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentHeader {
    pub class: SegmentClass,
    pub key_frame: bool,
    pub data_segments: u16,
    pub parity_segments: u16,
    pub generation_delay_usec: u32,
    pub timestamp_ms: u64,
}

impl SegmentHeader {
    pub const SIZE: usize = 18;

    const FLAG_KEY: u8 = 0x01;

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.class.as_u8());
        buf.put_u8(if self.key_frame { Self::FLAG_KEY } else { 0 });
        buf.put_u16(self.data_segments);
        buf.put_u16(self.parity_segments);
        buf.put_u32(self.generation_delay_usec);
        buf.put_u64(self.timestamp_ms);
    }

    pub fn decode(buf: &mut impl Buf) -> ParseResult<Self> {
        need(buf, Self::SIZE)?;
        let class = SegmentClass::from_u8(buf.get_u8())?;
        let flags = buf.get_u8();
        Ok(Self {
            class,
            key_frame: flags & Self::FLAG_KEY != 0,
            data_segments: buf.get_u16(),
            parity_segments: buf.get_u16(),
            generation_delay_usec: buf.get_u32(),
            timestamp_ms: buf.get_u64(),
        })
    }

    /// Split a segment payload into its header and codec bytes.
    pub fn split(payload: &Bytes) -> ParseResult<(Self, Bytes)> {
        let mut buf = payload.clone();
        let header = Self::decode(&mut buf)?;
        Ok((header, buf))
    }
}

/// Rolling description of the live stream head, republished every second.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LiveMeta {
    pub framerate: f64,
    pub gop_size: u32,
    pub segnum_estimate: u32,
    pub parity_segnum_estimate: u32,
    pub timestamp_ms: u64,
}

impl LiveMeta {
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_f64(self.framerate);
        buf.put_u32(self.gop_size);
        buf.put_u32(self.segnum_estimate);
        buf.put_u32(self.parity_segnum_estimate);
        buf.put_u64(self.timestamp_ms);
    }

    pub fn decode(buf: &mut impl Buf) -> ParseResult<Self> {
        need(buf, 28)?;
        let framerate = buf.get_f64();
        if !framerate.is_finite() || framerate <= 0.0 {
            return Err(ParseError::BadField("framerate"));
        }
        Ok(Self {
            framerate,
            gop_size: buf.get_u32(),
            segnum_estimate: buf.get_u32(),
            parity_segnum_estimate: buf.get_u32(),
            timestamp_ms: buf.get_u64(),
        })
    }

    /// Nominal distance between consecutive samples.
    pub fn sample_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.framerate)
    }
}

/// Static description of the stream, fetched once at bootstrap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamMeta {
    pub width: u32,
    pub height: u32,
    pub bitrate_kbps: u32,
    pub codec: String,
}

impl StreamMeta {
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.width);
        buf.put_u32(self.height);
        buf.put_u32(self.bitrate_kbps);
        buf.put_u16(self.codec.len() as u16);
        buf.put_slice(self.codec.as_bytes());
    }

    pub fn decode(buf: &mut impl Buf) -> ParseResult<Self> {
        need(buf, 14)?;
        let width = buf.get_u32();
        let height = buf.get_u32();
        let bitrate_kbps = buf.get_u32();
        let codec_len = buf.get_u16() as usize;
        need(buf, codec_len)?;
        let codec = String::from_utf8(buf.copy_to_bytes(codec_len).to_vec())
            .map_err(|_| ParseError::BadField("codec"))?;
        Ok(Self {
            width,
            height,
            bitrate_kbps,
            codec,
        })
    }
}

/// Reply payload of `_latest`: a delegation set pointing at the freshest
/// published sample. The last component of the first delegation is a
/// sequence number carrying the newest sample number.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LatestPointer {
    pub delegations: Vec<Name>,
}

impl LatestPointer {
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u16(self.delegations.len() as u16);
        for name in &self.delegations {
            buf.put_u16(name.len() as u16);
            for component in name.iter() {
                encode_component(component, buf);
            }
        }
    }

    pub fn decode(buf: &mut impl Buf) -> ParseResult<Self> {
        need(buf, 2)?;
        let count = buf.get_u16() as usize;
        let mut delegations = Vec::with_capacity(count);
        for _ in 0..count {
            need(buf, 2)?;
            let len = buf.get_u16() as usize;
            let mut name = Name::new();
            for _ in 0..len {
                name.push(decode_component(buf)?);
            }
            delegations.push(name);
        }
        Ok(Self { delegations })
    }

    /// The newest published sample number, if the set is well-formed.
    pub fn latest_sample(&self) -> Option<u64> {
        self.delegations.first()?.last()?.as_sequence()
    }
}

fn encode_component(component: &Component, buf: &mut impl BufMut) {
    buf.put_u8(component.tlv_type());
    match component {
        Component::Generic(bytes) => {
            buf.put_u16(bytes.len() as u16);
            buf.put_slice(bytes);
        }
        Component::Version(v) | Component::Segment(v) | Component::Sequence(v) => {
            buf.put_u16(8);
            buf.put_u64(*v);
        }
    }
}

fn decode_component(buf: &mut impl Buf) -> ParseResult<Component> {
    need(buf, 3)?;
    let tlv = buf.get_u8();
    let len = buf.get_u16() as usize;
    need(buf, len)?;
    match tlv {
        8 => Ok(Component::Generic(buf.copy_to_bytes(len))),
        50 | 54 | 58 => {
            if len != 8 {
                return Err(ParseError::BadField("numeric component length"));
            }
            let value = buf.get_u64();
            Ok(match tlv {
                50 => Component::Segment(value),
                54 => Component::Version(value),
                _ => Component::Sequence(value),
            })
        }
        _ => Err(ParseError::BadField("component type")),
    }
}
