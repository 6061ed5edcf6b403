use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid replay range: from {from} must be before to {to}")]
    InvalidRange { from: u64, to: u64 },

    #[error("rate multiplier {0} outside (0, 100]")]
    InvalidRate(f64),

    #[error("no topics specified")]
    EmptyTopics,

    #[error("too many concurrent replay sessions (max {0})")]
    TooManySessions(usize),

    #[error(transparent)]
    Storage(#[from] tickstream_storage::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
