#![forbid(unsafe_code)]

use std::fmt;

use crate::{
    error::{ParseError, ParseResult},
    name::{Component, Name},
};

/// Version of the name grammar spoken by this consumer.
pub const API_VERSION: u64 = 4;

/// Reserved name components of the stream namespace.
pub mod markers {
    pub const APP: &str = "ndnrtc";
    pub const AUDIO: &str = "audio";
    pub const VIDEO: &str = "video";
    pub const META: &str = "_meta";
    pub const LIVE: &str = "_live";
    pub const LATEST: &str = "_latest";
    pub const DELTA: &str = "d";
    pub const KEY: &str = "k";
    pub const PARITY: &str = "_parity";
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamType {
    Audio,
    Video,
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => write!(f, "{}", markers::AUDIO),
            Self::Video => write!(f, "{}", markers::VIDEO),
        }
    }
}

/// Inclusive prefix levels of a stream name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum NameFilter {
    Base,
    Stream,
    Thread,
    Sample,
    Segment,
}

/// Parsed view of a name under the stream grammar:
///
/// ```text
/// <base>/ndnrtc/<api-version>/(audio|video)/<stream>/( <thread>/(d|k)/<seq>[/_parity]/<seg>
///                                                    | _meta/<version>/<seg>
///                                                    | _live/<version>/<seg>
///                                                    | _latest/<version>/<seg> )
/// ```
///
/// Prefix-level names (stream, thread or sample level, and marker names
/// without a version yet) parse with the trailing fields `None`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamespaceInfo {
    pub base_prefix: Name,
    pub api_version: u64,
    pub stream_type: StreamType,
    pub stream_name: String,
    pub thread_name: Option<String>,
    pub is_delta: bool,
    pub is_parity: bool,
    pub is_meta: bool,
    pub is_live: bool,
    pub is_latest: bool,
    pub sample_no: Option<u64>,
    pub seg_no: Option<u64>,
    pub meta_version: Option<u64>,
}

impl NamespaceInfo {
    /// Parse `name`. The scan locates the rightmost app marker followed by
    /// a version component; everything before it is the base prefix.
    pub fn parse(name: &Name) -> ParseResult<Self> {
        let marker_at = (0..name.len().saturating_sub(1))
            .rev()
            .find(|&i| {
                name.get(i).is_some_and(|c| c.is(markers::APP))
                    && name.get(i + 1).is_some_and(|c| c.as_version().is_some())
            })
            .ok_or_else(|| ParseError::MissingMarker(name.to_string()))?;

        let api_version = name
            .get(marker_at + 1)
            .and_then(Component::as_version)
            .ok_or_else(|| ParseError::MissingMarker(name.to_string()))?;

        let stream_type = match name.get(marker_at + 2) {
            Some(c) if c.is(markers::AUDIO) => StreamType::Audio,
            Some(c) if c.is(markers::VIDEO) => StreamType::Video,
            _ => return Err(ParseError::BadStreamType(name.to_string())),
        };

        let stream_name = name
            .get(marker_at + 3)
            .and_then(Component::as_generic)
            .and_then(|b| std::str::from_utf8(b).ok())
            .ok_or_else(|| ParseError::BadStreamType(name.to_string()))?
            .to_string();

        let mut info = Self {
            base_prefix: name.prefix(marker_at),
            api_version,
            stream_type,
            stream_name,
            thread_name: None,
            is_delta: false,
            is_parity: false,
            is_meta: false,
            is_live: false,
            is_latest: false,
            sample_no: None,
            seg_no: None,
            meta_version: None,
        };

        let rest = name.sub_name(marker_at + 4);
        if rest.is_empty() {
            return Ok(info);
        }

        let head = rest.get(0).expect("non-empty");
        if head.is(markers::META) || head.is(markers::LIVE) || head.is(markers::LATEST) {
            info.is_meta = head.is(markers::META);
            info.is_live = head.is(markers::LIVE);
            info.is_latest = head.is(markers::LATEST);
            return parse_meta_suffix(name, rest.sub_name(1), info);
        }

        let thread = head
            .as_generic()
            .and_then(|b| std::str::from_utf8(b).ok())
            .ok_or_else(|| ParseError::BadSampleSuffix(name.to_string()))?;
        info.thread_name = Some(thread.to_string());
        parse_sample_suffix(name, rest.sub_name(1), info)
    }

    /// Reconstruct the full name this info describes. The segment-level
    /// prefix already carries every known field.
    pub fn format(&self) -> Name {
        self.prefix(NameFilter::Segment)
    }

    /// Inclusive prefix of the name up to `filter` level.
    pub fn prefix(&self, filter: NameFilter) -> Name {
        match filter {
            NameFilter::Base => self.base_prefix.clone(),
            NameFilter::Stream => self
                .base_prefix
                .clone()
                .with_str(markers::APP)
                .with(Component::Version(self.api_version))
                .with_str(&self.stream_type.to_string())
                .with_str(&self.stream_name),
            NameFilter::Thread => {
                let stream = self.prefix(NameFilter::Stream);
                match &self.thread_name {
                    Some(thread) => stream.with_str(thread),
                    None => stream,
                }
            }
            NameFilter::Sample => {
                if self.is_meta_family() {
                    let mut name = self.meta_prefix();
                    if let Some(version) = self.meta_version {
                        name = name.with(Component::Version(version));
                    }
                    return name;
                }
                let thread = self.prefix(NameFilter::Thread);
                match self.sample_no {
                    Some(sample) => thread
                        .with_str(if self.is_delta { markers::DELTA } else { markers::KEY })
                        .with(Component::Sequence(sample)),
                    None => thread,
                }
            }
            NameFilter::Segment => {
                let mut name = self.prefix(NameFilter::Sample);
                if self.is_parity {
                    name = name.with_str(markers::PARITY);
                }
                match self.seg_no {
                    Some(seg) => name.with(Component::Segment(seg)),
                    None => name,
                }
            }
        }
    }

    /// Complement of [`prefix`](Self::prefix): the components after it.
    pub fn suffix(&self, filter: NameFilter) -> Name {
        let full = self.format();
        full.sub_name(self.prefix(filter).len())
    }

    pub fn is_meta_family(&self) -> bool {
        self.is_meta || self.is_live || self.is_latest
    }

    /// True for names addressing a media sample (delta or key frame).
    pub fn is_sample(&self) -> bool {
        self.sample_no.is_some() && !self.is_meta_family()
    }

    fn meta_prefix(&self) -> Name {
        let marker = if self.is_live {
            markers::LIVE
        } else if self.is_latest {
            markers::LATEST
        } else {
            markers::META
        };
        self.prefix(NameFilter::Stream).with_str(marker)
    }
}

fn parse_meta_suffix(full: &Name, rest: Name, mut info: NamespaceInfo) -> ParseResult<NamespaceInfo> {
    let mut at = 0;
    if let Some(version) = rest.get(at).and_then(Component::as_version) {
        info.meta_version = Some(version);
        at += 1;
    }
    if let Some(seg) = rest.get(at).and_then(Component::as_segment) {
        if info.meta_version.is_none() {
            return Err(ParseError::BadMetaSuffix(full.to_string()));
        }
        info.seg_no = Some(seg);
        at += 1;
    }
    if at != rest.len() {
        return Err(ParseError::BadMetaSuffix(full.to_string()));
    }
    Ok(info)
}

fn parse_sample_suffix(
    full: &Name,
    rest: Name,
    mut info: NamespaceInfo,
) -> ParseResult<NamespaceInfo> {
    if rest.is_empty() {
        return Ok(info);
    }

    let class = rest.get(0).expect("non-empty");
    info.is_delta = class.is(markers::DELTA);
    if !info.is_delta && !class.is(markers::KEY) {
        return Err(ParseError::BadSampleSuffix(full.to_string()));
    }

    info.sample_no = Some(
        rest.get(1)
            .and_then(Component::as_sequence)
            .ok_or_else(|| ParseError::BadSampleSuffix(full.to_string()))?,
    );

    let mut at = 2;
    if rest.get(at).is_some_and(|c| c.is(markers::PARITY)) {
        info.is_parity = true;
        at += 1;
        // A parity marker must carry its segment number.
        if rest.get(at).and_then(Component::as_segment).is_none() {
            return Err(ParseError::BadSampleSuffix(full.to_string()));
        }
    }
    if let Some(seg) = rest.get(at).and_then(Component::as_segment) {
        info.seg_no = Some(seg);
        at += 1;
    }
    if at != rest.len() {
        return Err(ParseError::BadSampleSuffix(full.to_string()));
    }
    Ok(info)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn parse(uri: &str) -> ParseResult<NamespaceInfo> {
        NamespaceInfo::parse(&Name::from_uri(uri).unwrap())
    }

    #[test]
    fn video_segment_name() {
        let info = parse("/isp/cam/ndnrtc/v=4/video/front/hi/d/seq=102/seg=3").unwrap();
        assert_eq!(info.base_prefix.to_string(), "/isp/cam");
        assert_eq!(info.api_version, 4);
        assert_eq!(info.stream_type, StreamType::Video);
        assert_eq!(info.stream_name, "front");
        assert_eq!(info.thread_name.as_deref(), Some("hi"));
        assert!(info.is_delta);
        assert!(!info.is_parity);
        assert_eq!(info.sample_no, Some(102));
        assert_eq!(info.seg_no, Some(3));
        assert!(info.is_sample());
    }

    #[test]
    fn key_frame_parity_segment() {
        let info = parse("/c/ndnrtc/v=4/video/s/t/k/seq=30/_parity/seg=1").unwrap();
        assert!(!info.is_delta);
        assert!(info.is_parity);
        assert_eq!(info.sample_no, Some(30));
        assert_eq!(info.seg_no, Some(1));
    }

    #[rstest]
    #[case("/c/ndnrtc/v=4/video/s/_live", true, false, false)]
    #[case("/c/ndnrtc/v=4/video/s/_latest", false, true, false)]
    #[case("/c/ndnrtc/v=4/video/s/_meta", false, false, true)]
    fn meta_family_markers(
        #[case] uri: &str,
        #[case] live: bool,
        #[case] latest: bool,
        #[case] meta: bool,
    ) {
        let info = parse(uri).unwrap();
        assert_eq!(info.is_live, live);
        assert_eq!(info.is_latest, latest);
        assert_eq!(info.is_meta, meta);
        assert!(info.thread_name.is_none());
        assert!(!info.is_sample());
    }

    #[test]
    fn live_data_name_with_version_and_segment() {
        let info = parse("/c/ndnrtc/v=4/video/s/_live/v=17/seg=0").unwrap();
        assert!(info.is_live);
        assert_eq!(info.meta_version, Some(17));
        assert_eq!(info.seg_no, Some(0));
    }

    #[rstest]
    #[case("/c/video/s/t/d/seq=1/seg=0")] // no marker
    #[case("/c/ndnrtc/video/s")] // marker without version
    #[case("/c/ndnrtc/v=4/text/s")] // bad stream type
    #[case("/c/ndnrtc/v=4/video/s/t/x/seq=1/seg=0")] // bad frame class
    #[case("/c/ndnrtc/v=4/video/s/t/d/seg=0")] // missing sequence
    #[case("/c/ndnrtc/v=4/video/s/t/d/seq=1/_parity")] // parity without segment
    #[case("/c/ndnrtc/v=4/video/s/t/d/seq=1/seg=0/extra")] // trailing garbage
    #[case("/c/ndnrtc/v=4/video/s/_live/seg=0")] // meta segment without version
    fn malformed_names_are_errors(#[case] uri: &str) {
        assert!(parse(uri).is_err(), "{uri} should not parse");
    }

    #[rstest]
    #[case("/c/ndnrtc/v=4/video/s")]
    #[case("/c/ndnrtc/v=4/audio/s/mic")]
    #[case("/c/ndnrtc/v=4/video/s/t/d/seq=7")]
    #[case("/c/ndnrtc/v=4/video/s/t/k/seq=8/seg=2")]
    #[case("/c/ndnrtc/v=4/video/s/t/d/seq=9/_parity/seg=0")]
    #[case("/c/ndnrtc/v=4/video/s/_latest/v=3/seg=0")]
    fn format_round_trips(#[case] uri: &str) {
        let info = parse(uri).unwrap();
        assert_eq!(info.format().to_string(), uri);
        assert_eq!(NamespaceInfo::parse(&info.format()).unwrap(), info);
    }

    #[test]
    fn prefix_levels() {
        let info = parse("/isp/cam/ndnrtc/v=4/video/front/hi/d/seq=102/seg=3").unwrap();
        assert_eq!(info.prefix(NameFilter::Base).to_string(), "/isp/cam");
        assert_eq!(
            info.prefix(NameFilter::Stream).to_string(),
            "/isp/cam/ndnrtc/v=4/video/front"
        );
        assert_eq!(
            info.prefix(NameFilter::Thread).to_string(),
            "/isp/cam/ndnrtc/v=4/video/front/hi"
        );
        assert_eq!(
            info.prefix(NameFilter::Sample).to_string(),
            "/isp/cam/ndnrtc/v=4/video/front/hi/d/seq=102"
        );
        assert_eq!(
            info.prefix(NameFilter::Segment).to_string(),
            "/isp/cam/ndnrtc/v=4/video/front/hi/d/seq=102/seg=3"
        );
        assert_eq!(info.suffix(NameFilter::Thread).to_string(), "/d/seq=102/seg=3");
    }

    #[test]
    fn marker_in_base_prefix_is_skipped() {
        // The scan keys on marker + version, so a literal "ndnrtc" earlier
        // in the base prefix does not confuse it.
        let info = parse("/ndnrtc/site/ndnrtc/v=4/video/s/t/d/seq=1/seg=0").unwrap();
        assert_eq!(info.base_prefix.to_string(), "/ndnrtc/site");
    }
}
