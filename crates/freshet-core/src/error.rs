#![forbid(unsafe_code)]

use thiserror::Error;

/// Errors produced while parsing names, namespace structure or wire
/// payloads. Parsing is total: malformed input yields one of these,
/// never a panic.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty name component in `{0}`")]
    EmptyComponent(String),

    #[error("bad percent-escape in `{0}`")]
    BadEscape(String),

    #[error("bad numeric component `{0}`")]
    BadNumber(String),

    #[error("no app marker followed by a version in `{0}`")]
    MissingMarker(String),

    #[error("unrecognized stream type `{0}`")]
    BadStreamType(String),

    #[error("malformed sample suffix in `{0}`")]
    BadSampleSuffix(String),

    #[error("malformed meta suffix in `{0}`")]
    BadMetaSuffix(String),

    #[error("truncated payload: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("bad payload field: {0}")]
    BadField(&'static str),
}

pub type ParseResult<T> = Result<T, ParseError>;
