#![forbid(unsafe_code)]

use std::time::Duration;

use bytes::Bytes;
use freshet_core::{NamespaceInfo, ParseResult, SegmentHeader};
use tokio::time::Instant;

use crate::face::Interest;

/// Lifecycle of a single fetch. Every request walks a prefix of
/// `Created → Expressed → (Data | Timeout | NetworkNack | AppNack |
/// Cancelled)` and never moves again once terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestStatus {
    Created,
    Expressed,
    Data,
    Timeout,
    NetworkNack,
    AppNack,
    Cancelled,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Created | Self::Expressed)
    }
}

/// A pending or completed fetch of one Data packet.
#[derive(Clone, Debug)]
pub struct DataRequest {
    interest: Interest,
    info: NamespaceInfo,
    status: RequestStatus,
    request_time: Option<Instant>,
    reply_time: Option<Instant>,
    payload: Option<Bytes>,
    header: Option<SegmentHeader>,
}

impl DataRequest {
    /// Build a request; the Interest name must parse under the stream
    /// grammar (the parsed view is kept for routing).
    pub fn new(interest: Interest) -> ParseResult<Self> {
        let info = NamespaceInfo::parse(&interest.name)?;
        Ok(Self {
            interest,
            info,
            status: RequestStatus::Created,
            request_time: None,
            reply_time: None,
            payload: None,
            header: None,
        })
    }

    pub fn interest(&self) -> &Interest {
        &self.interest
    }

    pub fn info(&self) -> &NamespaceInfo {
        &self.info
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    pub fn request_time(&self) -> Option<Instant> {
        self.request_time
    }

    pub fn reply_time(&self) -> Option<Instant> {
        self.reply_time
    }

    /// Verified payload with the segment header stripped for media
    /// segments; the raw payload for meta-family replies.
    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    pub fn header(&self) -> Option<&SegmentHeader> {
        self.header.as_ref()
    }

    /// Raw round trip from expression to reply.
    pub fn rtt(&self) -> Option<Duration> {
        Some(self.reply_time?.duration_since(self.request_time?))
    }

    /// Data retrieval delay: round trip minus the producer generation
    /// delay, i.e. pure network time for an on-demand reply.
    pub fn drd(&self) -> Option<Duration> {
        let rtt = self.rtt()?;
        let generation = self
            .header
            .map(|h| Duration::from_micros(u64::from(h.generation_delay_usec)))
            .unwrap_or_default();
        Some(rtt.saturating_sub(generation))
    }

    /// Whether the reply was produced on demand rather than served from a
    /// cache. Media segments advertise this through a non-zero generation
    /// delay; fresh-only Interests cannot be answered from a stale cache.
    pub fn is_original(&self) -> bool {
        match self.header {
            Some(header) => header.generation_delay_usec > 0,
            None => self.interest.must_be_fresh,
        }
    }

    pub fn mark_expressed(&mut self, now: Instant) {
        debug_assert_eq!(self.status, RequestStatus::Created);
        self.status = RequestStatus::Expressed;
        self.request_time = Some(now);
    }

    pub fn complete(
        &mut self,
        payload: Bytes,
        header: Option<SegmentHeader>,
        now: Instant,
    ) {
        debug_assert!(!self.status.is_terminal());
        self.status = RequestStatus::Data;
        self.reply_time = Some(now);
        self.payload = Some(payload);
        self.header = header;
    }

    pub fn fail(&mut self, status: RequestStatus, now: Instant) {
        debug_assert!(status.is_terminal());
        debug_assert!(!self.status.is_terminal());
        self.status = status;
        self.reply_time = Some(now);
    }
}
