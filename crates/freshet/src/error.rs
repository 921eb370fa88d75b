#![forbid(unsafe_code)]

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("bootstrap failed: {0}")]
    BootstrapFailed(String),

    #[error(transparent)]
    Net(#[from] freshet_net::NetError),

    #[error(transparent)]
    Buffer(#[from] freshet_buffer::BufferError),

    #[error(transparent)]
    Parse(#[from] freshet_core::ParseError),
}

pub type ConsumerResult<T> = Result<T, ConsumerError>;
