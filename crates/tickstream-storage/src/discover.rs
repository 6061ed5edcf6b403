//! Data Directory Discovery
//!
//! Recorded pairs are named `md_YYYYMMDD_HHMMSS[.N].mdf` / `.idx` after the
//! UTC second of their first frame. Lookup narrows candidates by the
//! name-encoded timestamp, then confirms by reading the `MdfHeader`, whose
//! `start_ts_ns`/`end_ts_ns` range is authoritative (names are truncated to
//! whole seconds and say nothing about where a file ends).

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use crate::error::{Error, Result};
use crate::mdf::{idx_path_for, MdfHeader};

/// Find the `.mdf` file whose recorded range contains `ts_ns`.
pub fn find_file_for_timestamp(data_dir: &Path, ts_ns: u64) -> Result<PathBuf> {
    let mut candidates: Vec<(Option<u64>, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(data_dir)? {
        let path = entry?.path();
        if path.extension().map(|ext| ext == "mdf").unwrap_or(false)
            && idx_path_for(&path).exists()
        {
            let name_ts = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(parse_name_timestamp);
            candidates.push((name_ts, path));
        }
    }
    if candidates.is_empty() {
        return Err(Error::NoFileForTimestamp { ts_ns });
    }
    candidates.sort();

    // Most likely candidate first: the last file whose name-second is at or
    // before the target (the name is the truncated first-frame time).
    let target_sec = ts_ns / 1_000_000_000;
    let likely = candidates
        .iter()
        .rev()
        .find(|(name_ts, _)| matches!(name_ts, Some(sec) if *sec <= target_sec))
        .map(|(_, path)| path.clone());

    if let Some(path) = likely {
        if header_contains(&path, ts_ns) {
            return Ok(path);
        }
    }

    // Fall back to inspecting every candidate's header.
    for (_, path) in &candidates {
        if header_contains(path, ts_ns) {
            return Ok(path.clone());
        }
    }

    Err(Error::NoFileForTimestamp { ts_ns })
}

fn header_contains(path: &Path, ts_ns: u64) -> bool {
    match MdfHeader::read_from(path) {
        Ok(header) => header.start_ts_ns <= ts_ns && ts_ns <= header.end_ts_ns,
        Err(_) => false,
    }
}

/// Parse the UTC second out of a stem like `md_20240101_123456` or
/// `md_20240101_123456_1` (collision suffix).
fn parse_name_timestamp(stem: &str) -> Option<u64> {
    let rest = stem.strip_prefix("md_")?;
    if rest.len() < 15 {
        return None;
    }
    let stamp = &rest[..15];
    let parsed = NaiveDateTime::parse_from_str(stamp, "%Y%m%d_%H%M%S").ok()?;
    u64::try_from(parsed.and_utc().timestamp()).ok()
}
