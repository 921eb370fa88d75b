#![forbid(unsafe_code)]

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use freshet_core::Name;
use thiserror::Error;

/// An outgoing request for one named Data packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Interest {
    pub name: Name,
    pub lifetime: Duration,
    pub must_be_fresh: bool,
}

impl Interest {
    pub fn new(name: Name, lifetime: Duration) -> Self {
        Self {
            name,
            lifetime,
            must_be_fresh: false,
        }
    }

    /// An Interest that must be answered by freshly produced Data.
    pub fn fresh(name: Name, lifetime: Duration) -> Self {
        Self {
            name,
            lifetime,
            must_be_fresh: true,
        }
    }
}

/// Payload kind of a Data packet. `Nack` is an application-level refusal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentType {
    Blob,
    Nack,
}

/// A signed reply. Signature bytes stay opaque to the consumer core; the
/// `Verifier` collaborator decides whether the packet is authentic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Data {
    pub name: Name,
    pub payload: Bytes,
    pub content_type: ContentType,
}

impl Data {
    pub fn blob(name: Name, payload: Bytes) -> Self {
        Self {
            name,
            payload,
            content_type: ContentType::Blob,
        }
    }

    pub fn app_nack(name: Name) -> Self {
        Self {
            name,
            payload: Bytes::new(),
            content_type: ContentType::Nack,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FaceError {
    #[error("interest timed out")]
    Timeout,

    #[error("network nack: {0}")]
    Nack(String),

    #[error("transport failure: {0}")]
    Transport(String),
}

/// The transport collaborator. Implementations resolve one Interest into
/// one Data packet or a failure; retransmission policy lives above.
#[async_trait]
pub trait Face: Send + Sync {
    async fn express(&self, interest: &Interest) -> Result<Data, FaceError>;
}

/// Signature verification collaborator.
pub trait Verifier: Send + Sync {
    fn verify(&self, data: &Data) -> bool;
}

/// Verifier that trusts everything. For tests and unsigned local setups.
pub struct AcceptAll;

impl Verifier for AcceptAll {
    fn verify(&self, _data: &Data) -> bool {
        true
    }
}
