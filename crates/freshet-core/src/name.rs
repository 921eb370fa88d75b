#![forbid(unsafe_code)]

use std::{cmp::Ordering, fmt};

use bytes::Bytes;

use crate::error::{ParseError, ParseResult};

/// One typed name component.
///
/// Versions, segments and sequence numbers are distinct component types on
/// the wire (TLV types 54, 50 and 58) and carry the `v=`/`seg=`/`seq=`
/// prefixes in URI form. Everything else is a generic component.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Component {
    Generic(Bytes),
    Version(u64),
    Segment(u64),
    Sequence(u64),
}

impl Component {
    pub fn generic(value: impl AsRef<[u8]>) -> Self {
        Self::Generic(Bytes::copy_from_slice(value.as_ref()))
    }

    /// TLV type number of this component.
    pub fn tlv_type(&self) -> u8 {
        match self {
            Self::Generic(_) => 8,
            Self::Segment(_) => 50,
            Self::Version(_) => 54,
            Self::Sequence(_) => 58,
        }
    }

    pub fn as_version(&self) -> Option<u64> {
        match self {
            Self::Version(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_segment(&self) -> Option<u64> {
        match self {
            Self::Segment(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<u64> {
        match self {
            Self::Sequence(v) => Some(*v),
            _ => None,
        }
    }

    /// Byte view of a generic component, if this is one.
    pub fn as_generic(&self) -> Option<&[u8]> {
        match self {
            Self::Generic(b) => Some(b),
            _ => None,
        }
    }

    pub fn is(&self, literal: &str) -> bool {
        self.as_generic() == Some(literal.as_bytes())
    }

    fn parse(text: &str) -> ParseResult<Self> {
        if text.is_empty() {
            return Err(ParseError::EmptyComponent(text.to_string()));
        }
        for (prefix, ctor) in [
            ("v=", Component::Version as fn(u64) -> Component),
            ("seg=", Component::Segment),
            ("seq=", Component::Sequence),
        ] {
            if let Some(rest) = text.strip_prefix(prefix) {
                let value = rest
                    .parse::<u64>()
                    .map_err(|_| ParseError::BadNumber(text.to_string()))?;
                return Ok(ctor(value));
            }
        }
        Ok(Self::Generic(unescape(text)?))
    }
}

fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~')
}

fn unescape(text: &str) -> ParseResult<Bytes> {
    let raw = text.as_bytes();
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'%' {
            let hex = raw
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| ParseError::BadEscape(text.to_string()))?;
            out.push(hex);
            i += 3;
        } else {
            out.push(raw[i]);
            i += 1;
        }
    }
    Ok(Bytes::from(out))
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generic(bytes) => {
                for &b in bytes.iter() {
                    if is_unreserved(b) {
                        write!(f, "{}", b as char)?;
                    } else {
                        write!(f, "%{b:02X}")?;
                    }
                }
                Ok(())
            }
            Self::Version(v) => write!(f, "v={v}"),
            Self::Segment(v) => write!(f, "seg={v}"),
            Self::Sequence(v) => write!(f, "seq={v}"),
        }
    }
}

impl Ord for Component {
    /// Canonical order: by TLV type, then by encoded length, then bytewise.
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Generic(a), Self::Generic(b)) => {
                a.len().cmp(&b.len()).then_with(|| a.cmp(b))
            }
            (Self::Version(a), Self::Version(b))
            | (Self::Segment(a), Self::Segment(b))
            | (Self::Sequence(a), Self::Sequence(b)) => a.cmp(b),
            _ => self.tlv_type().cmp(&other.tlv_type()),
        }
    }
}

impl PartialOrd for Component {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A hierarchical name: an ordered sequence of typed components.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name {
    components: Vec<Component>,
}

impl Name {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a URI like `/base/ndnrtc/v=4/video/cam/hi/d/seq=102/seg=0`.
    pub fn from_uri(uri: &str) -> ParseResult<Self> {
        let trimmed = uri.trim().trim_start_matches('/').trim_end_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::new());
        }
        let components = trimmed
            .split('/')
            .map(Component::parse)
            .collect::<ParseResult<Vec<_>>>()?;
        Ok(Self { components })
    }

    pub fn push(&mut self, component: Component) {
        self.components.push(component);
    }

    /// Builder-style append of one component.
    #[must_use]
    pub fn with(mut self, component: Component) -> Self {
        self.push(component);
        self
    }

    /// Builder-style append of a generic string component.
    #[must_use]
    pub fn with_str(self, literal: &str) -> Self {
        self.with(Component::generic(literal))
    }

    /// Append all components of `suffix`.
    #[must_use]
    pub fn join(mut self, suffix: &Name) -> Self {
        self.components.extend(suffix.components.iter().cloned());
        self
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Component> {
        self.components.get(index)
    }

    pub fn last(&self) -> Option<&Component> {
        self.components.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Component> {
        self.components.iter()
    }

    /// The first `count` components as a new name.
    pub fn prefix(&self, count: usize) -> Name {
        Name {
            components: self.components[..count.min(self.len())].to_vec(),
        }
    }

    /// Components from `start` to the end as a new name.
    pub fn sub_name(&self, start: usize) -> Name {
        Name {
            components: self.components[start.min(self.len())..].to_vec(),
        }
    }

    pub fn starts_with(&self, prefix: &Name) -> bool {
        self.len() >= prefix.len() && self.components[..prefix.len()] == prefix.components[..]
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "/");
        }
        for component in &self.components {
            write!(f, "/{component}")?;
        }
        Ok(())
    }
}

impl FromIterator<Component> for Name {
    fn from_iter<I: IntoIterator<Item = Component>>(iter: I) -> Self {
        Name {
            components: iter.into_iter().collect(),
        }
    }
}
