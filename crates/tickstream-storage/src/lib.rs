//! Persistence layer: the recorder appends encoded frames to rolling `.mdf`
//! files with a sparse `.idx` timestamp index alongside; the reader seeks a
//! recorded pair by timestamp for replay; discovery locates the pair covering
//! a timestamp in the data directory.

pub mod discover;
pub mod error;
pub mod mdf;
pub mod reader;
pub mod recorder;

pub use discover::find_file_for_timestamp;
pub use error::{Error, Result};
pub use mdf::{IndexEntry, MdfHeader, INDEX_ENTRY_LEN, MDF_HEADER_LEN};
pub use reader::MdfReader;
pub use recorder::{Recorder, RecorderConfig, RecorderStats};
