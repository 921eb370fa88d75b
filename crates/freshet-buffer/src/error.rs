#![forbid(unsafe_code)]

use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("request set does not address exactly one sample")]
    InvalidRequestSet,

    #[error("slot is not free")]
    SlotNotFree,

    #[error("slot is not active")]
    SlotNotActive,

    #[error("sample {0} is already buffered")]
    DuplicateSample(u64),

    #[error("no slot buffered for sample {0}")]
    UnknownSample(u64),
}

pub type BufferResult<T> = Result<T, BufferError>;
