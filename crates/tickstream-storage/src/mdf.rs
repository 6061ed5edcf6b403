//! Recorded File Formats
//!
//! A recording is a pair of files sharing a base name `md_YYYYMMDD_HHMMSS`
//! derived from the UTC time of the first frame written:
//!
//! ```text
//! .mdf:  [MdfHeader][Frame][Frame]...      // frames as encoded on the wire
//! .idx:  [IndexEntry][IndexEntry]...       // sparse timestamp index
//! ```
//!
//! `MdfHeader` is 32 bytes little-endian: magic, version, reserved, first and
//! last frame timestamps, symbol count and frame count. The header is
//! rewritten in place as the file grows, so a crashed process leaves at most
//! a slightly stale header, never a torn frame boundary before the last sync.
//!
//! Each `IndexEntry` (16 bytes) maps a frame timestamp to the absolute byte
//! offset of that frame's start in the paired `.mdf`; entries are
//! non-decreasing in timestamp.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Data file magic: 'M','D','F','I' read as a little-endian u32.
pub const MDF_MAGIC: u32 = 0x4D44_4649;

pub const MDF_VERSION: u16 = 1;

/// Encoded size of [`MdfHeader`].
pub const MDF_HEADER_LEN: usize = 32;

/// Encoded size of [`IndexEntry`].
pub const INDEX_ENTRY_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MdfHeader {
    pub start_ts_ns: u64,
    pub end_ts_ns: u64,
    pub symbol_count: u32,
    pub frame_count: u32,
}

impl MdfHeader {
    pub fn encode(&self) -> [u8; MDF_HEADER_LEN] {
        let mut buf = [0u8; MDF_HEADER_LEN];
        buf[0..4].copy_from_slice(&MDF_MAGIC.to_le_bytes());
        buf[4..6].copy_from_slice(&MDF_VERSION.to_le_bytes());
        // bytes 6..8 reserved
        buf[8..16].copy_from_slice(&self.start_ts_ns.to_le_bytes());
        buf[16..24].copy_from_slice(&self.end_ts_ns.to_le_bytes());
        buf[24..28].copy_from_slice(&self.symbol_count.to_le_bytes());
        buf[28..32].copy_from_slice(&self.frame_count.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < MDF_HEADER_LEN {
            return Err(Error::TruncatedHeader);
        }
        let magic = u32::from_le_bytes(data[0..4].try_into().unwrap());
        if magic != MDF_MAGIC {
            return Err(Error::BadFileMagic(magic));
        }
        let version = u16::from_le_bytes(data[4..6].try_into().unwrap());
        if version != MDF_VERSION {
            return Err(Error::UnsupportedFileVersion(version));
        }
        Ok(Self {
            start_ts_ns: u64::from_le_bytes(data[8..16].try_into().unwrap()),
            end_ts_ns: u64::from_le_bytes(data[16..24].try_into().unwrap()),
            symbol_count: u32::from_le_bytes(data[24..28].try_into().unwrap()),
            frame_count: u32::from_le_bytes(data[28..32].try_into().unwrap()),
        })
    }

    /// Read and validate a header from the front of an `.mdf` file.
    pub fn read_from(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut buf = [0u8; MDF_HEADER_LEN];
        file.read_exact(&mut buf)
            .map_err(|_| Error::TruncatedHeader)?;
        Self::decode(&buf)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub ts_ns_first: u64,
    /// Absolute byte offset of the frame start in the paired `.mdf`.
    pub file_offset: u64,
}

impl IndexEntry {
    pub fn encode(&self) -> [u8; INDEX_ENTRY_LEN] {
        let mut buf = [0u8; INDEX_ENTRY_LEN];
        buf[0..8].copy_from_slice(&self.ts_ns_first.to_le_bytes());
        buf[8..16].copy_from_slice(&self.file_offset.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8; INDEX_ENTRY_LEN]) -> Self {
        Self {
            ts_ns_first: u64::from_le_bytes(data[0..8].try_into().unwrap()),
            file_offset: u64::from_le_bytes(data[8..16].try_into().unwrap()),
        }
    }
}

/// Load a whole `.idx` file. A trailing partial entry (torn write at crash)
/// is ignored.
pub fn read_index(path: &Path) -> Result<Vec<IndexEntry>> {
    let mut data = Vec::new();
    File::open(path)?.read_to_end(&mut data)?;
    let mut entries = Vec::with_capacity(data.len() / INDEX_ENTRY_LEN);
    for chunk in data.chunks_exact(INDEX_ENTRY_LEN) {
        entries.push(IndexEntry::decode(chunk.try_into().unwrap()));
    }
    Ok(entries)
}

/// `.idx` path paired with an `.mdf` path.
pub fn idx_path_for(mdf_path: &Path) -> PathBuf {
    mdf_path.with_extension("idx")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_header_roundtrip() {
        let header = MdfHeader {
            start_ts_ns: 100,
            end_ts_ns: 500,
            symbol_count: 3,
            frame_count: 42,
        };
        let encoded = header.encode();
        assert_eq!(encoded.len(), MDF_HEADER_LEN);
        assert_eq!(MdfHeader::decode(&encoded).unwrap(), header);
    }

    #[test]
    fn test_header_magic_bytes() {
        let header = MdfHeader {
            start_ts_ns: 0,
            end_ts_ns: 0,
            symbol_count: 0,
            frame_count: 0,
        };
        let encoded = header.encode();
        // 'I','F','D','M' little-endian
        assert_eq!(&encoded[0..4], &[0x49, 0x46, 0x44, 0x4D]);
        assert_eq!(u16::from_le_bytes([encoded[4], encoded[5]]), 1);
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        let mut encoded = MdfHeader {
            start_ts_ns: 0,
            end_ts_ns: 0,
            symbol_count: 0,
            frame_count: 0,
        }
        .encode();
        encoded[0] = 0;
        assert!(matches!(
            MdfHeader::decode(&encoded),
            Err(Error::BadFileMagic(_))
        ));
    }

    #[test]
    fn test_header_rejects_bad_version() {
        let mut encoded = MdfHeader {
            start_ts_ns: 0,
            end_ts_ns: 0,
            symbol_count: 0,
            frame_count: 0,
        }
        .encode();
        encoded[4] = 7;
        assert!(matches!(
            MdfHeader::decode(&encoded),
            Err(Error::UnsupportedFileVersion(7))
        ));
    }

    #[test]
    fn test_header_rejects_truncation() {
        assert!(matches!(
            MdfHeader::decode(&[0u8; 10]),
            Err(Error::TruncatedHeader)
        ));
    }

    #[test]
    fn test_index_entry_roundtrip() {
        let entry = IndexEntry {
            ts_ns_first: u64::MAX,
            file_offset: 12345,
        };
        assert_eq!(IndexEntry::decode(&entry.encode()), entry);
    }

    #[test]
    fn test_read_index_ignores_trailing_partial_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.idx");
        let mut file = File::create(&path).unwrap();
        file.write_all(
            &IndexEntry {
                ts_ns_first: 7,
                file_offset: 32,
            }
            .encode(),
        )
        .unwrap();
        file.write_all(&[1, 2, 3]).unwrap(); // torn write

        let entries = read_index(&path).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].ts_ns_first, 7);
    }

    #[test]
    fn test_idx_path_for() {
        assert_eq!(
            idx_path_for(Path::new("/data/md_20240101_000000.mdf")),
            Path::new("/data/md_20240101_000000.idx")
        );
    }
}
