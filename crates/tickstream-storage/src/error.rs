use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] tickstream_core::Error),

    #[error("invalid data file magic: {0:#010x}")]
    BadFileMagic(u32),

    #[error("unsupported data file version: {0}")]
    UnsupportedFileVersion(u16),

    #[error("truncated data file header")]
    TruncatedHeader,

    #[error("seek target {target} is past the end of the file")]
    SeekPastEof { target: u64 },

    #[error("no recorded file covers timestamp {ts_ns}")]
    NoFileForTimestamp { ts_ns: u64 },
}

pub type Result<T> = std::result::Result<T, Error>;
