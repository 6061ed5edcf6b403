use thiserror::Error;

/// Normalization failures. These never cross a task boundary: the worker
/// counts the error, drops the event and moves on.
#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error("non-finite {field} value: {value}")]
    NonFinite { field: &'static str, value: f64 },

    #[error("price {0} overflows the fixed-point range")]
    PriceOverflow(f64),

    #[error("size {0} overflows the fixed-point range")]
    SizeOverflow(f64),

    #[error("negative size: {0}")]
    NegativeSize(f64),
}

pub type Result<T> = std::result::Result<T, Error>;
