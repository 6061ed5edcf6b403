//! Error Types for the Framing Codec
//!
//! Decoding distinguishes every rejection cause so callers can count them
//! separately: a truncated buffer, bad magic bytes, an unsupported version,
//! an unknown message type, a body length that does not match the fixed size
//! of the tagged variant, and a CRC mismatch.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("buffer too short: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },

    #[error("invalid magic bytes: {0:#010x}")]
    BadMagic(u32),

    #[error("unsupported version: {0}")]
    UnsupportedVersion(u16),

    #[error("unknown message type: {0}")]
    UnknownMsgType(u16),

    #[error("body length {body_len} does not match message type {msg_type}")]
    BodyLenMismatch { msg_type: u16, body_len: u32 },

    #[error("CRC mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    Crc { stored: u32, computed: u32 },
}

pub type Result<T> = std::result::Result<T, Error>;
