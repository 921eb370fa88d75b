//! Network-facing half of the freshet consumer: Interest/Data values, the
//! `Face` and `Verifier` collaborator contracts, per-request bookkeeping
//! and the request queue with its delay estimators.

#![forbid(unsafe_code)]

mod estimators;
mod face;
mod queue;
mod request;

pub use estimators::{Ewma, WindowedDeviation};
pub use face::{AcceptAll, ContentType, Data, Face, FaceError, Interest, Verifier};
pub use queue::{CompletionStream, NetError, NetResult, RawCompletion, RequestQueue};
pub use request::{DataRequest, RequestStatus};
