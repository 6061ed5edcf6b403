//! Recorded File Reader
//!
//! Sequential frame reader over an `.mdf`/`.idx` pair with timestamp seeks.
//!
//! Seeking binary-searches the index for the greatest entry with
//! `ts_ns_first <= target`, positions the data file there (or just after the
//! header when the target precedes every entry), then scans forward frame by
//! frame until the next frame's timestamp reaches the target. Hitting EOF
//! before the target is a seek failure.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tickstream_core::codec;
use tickstream_core::frame::{Frame, FRAME_HEADER_LEN};

use crate::error::{Error, Result};
use crate::mdf::{idx_path_for, read_index, IndexEntry, MdfHeader, MDF_HEADER_LEN};

pub struct MdfReader {
    reader: BufReader<File>,
    mdf_path: PathBuf,
    header: MdfHeader,
    index: Vec<IndexEntry>,
    /// Byte position of the next frame to read.
    pos: u64,
}

impl MdfReader {
    /// Open a data file and its paired index.
    pub fn open(mdf_path: &Path) -> Result<Self> {
        let header = MdfHeader::read_from(mdf_path)?;
        let index = read_index(&idx_path_for(mdf_path))?;

        let file = File::open(mdf_path)?;
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(MDF_HEADER_LEN as u64))?;

        Ok(Self {
            reader,
            mdf_path: mdf_path.to_path_buf(),
            header,
            index,
            pos: MDF_HEADER_LEN as u64,
        })
    }

    pub fn header(&self) -> &MdfHeader {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.mdf_path
    }

    pub fn index_entries(&self) -> &[IndexEntry] {
        &self.index
    }

    /// Read the next frame, or `None` at a clean end of file.
    pub fn read_next(&mut self) -> Result<Option<Frame>> {
        let mut header_buf = [0u8; FRAME_HEADER_LEN];
        match self.reader.read_exact(&mut header_buf) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err.into()),
        }

        let msg_type = u16::from_le_bytes(header_buf[6..8].try_into().unwrap());
        let body_len = u32::from_le_bytes(header_buf[8..12].try_into().unwrap()) as usize;
        // Validate the claimed length against the tag before trusting it for
        // the body read; a corrupt header must not drive the allocation.
        let expected = tickstream_core::frame::MsgType::from_u16(msg_type)
            .ok_or(tickstream_core::Error::UnknownMsgType(msg_type))?
            .body_len();
        if body_len != expected {
            return Err(tickstream_core::Error::BodyLenMismatch {
                msg_type,
                body_len: body_len as u32,
            }
            .into());
        }
        let mut buf = vec![0u8; FRAME_HEADER_LEN + body_len];
        buf[..FRAME_HEADER_LEN].copy_from_slice(&header_buf);
        match self.reader.read_exact(&mut buf[FRAME_HEADER_LEN..]) {
            Ok(()) => {}
            // A torn tail (crash mid-frame before the last sync) ends the file.
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err.into()),
        }

        let frame = codec::decode(&buf)?;
        self.pos += buf.len() as u64;
        Ok(Some(frame))
    }

    /// Position the reader at the first frame with `ts_ns >= target`.
    pub fn seek_to_ts(&mut self, target: u64) -> Result<()> {
        // Greatest index entry at or before the target, else the first frame.
        let at = self.index.partition_point(|e| e.ts_ns_first <= target);
        let offset = if at == 0 {
            MDF_HEADER_LEN as u64
        } else {
            self.index[at - 1].file_offset
        };
        self.seek_to_offset(offset)?;

        loop {
            let mark = self.pos;
            match self.read_next()? {
                None => return Err(Error::SeekPastEof { target }),
                Some(frame) => {
                    if frame.ts_ns().unwrap_or(0) >= target {
                        self.seek_to_offset(mark)?;
                        return Ok(());
                    }
                }
            }
        }
    }

    fn seek_to_offset(&mut self, offset: u64) -> Result<()> {
        self.reader.seek(SeekFrom::Start(offset))?;
        self.pos = offset;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::{Recorder, RecorderConfig};
    use crossbeam_channel::bounded;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tickstream_core::frame::{L1Body, TradeBody};
    use tickstream_observability::MetricsSink;

    fn l1_frame(ts_ns: u64, seq: u64) -> Frame {
        Frame::L1(L1Body {
            ts_ns,
            symbol_id: 1,
            bid_px: 100,
            bid_sz: 1,
            ask_px: 101,
            ask_sz: 1,
            seq,
        })
    }

    /// Record `frames` with the given index interval into `dir`, returning
    /// the single produced `.mdf` path.
    fn record(dir: &Path, frames: &[Frame], index_interval: u32) -> PathBuf {
        let (tx, rx) = bounded(10_000);
        let sink = Arc::new(MetricsSink::new());
        let mut recorder = Recorder::new(
            RecorderConfig {
                data_dir: dir.to_path_buf(),
                roll_bytes: u64::MAX,
                index_interval,
                fsync_interval: Duration::from_millis(5),
            },
            rx,
            sink,
        );
        recorder.start();
        for frame in frames {
            tx.send(*frame).unwrap();
        }
        let deadline = Instant::now() + Duration::from_secs(5);
        while recorder.stats().frames_written < frames.len() as u64
            && Instant::now() < deadline
        {
            std::thread::sleep(Duration::from_millis(5));
        }
        recorder.stop();

        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .find(|p| p.extension().map(|ext| ext == "mdf").unwrap_or(false))
            .expect("recorded file")
    }

    #[test]
    fn test_sequential_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let frames: Vec<Frame> = (0..10)
            .map(|i| l1_frame(1_000_000_000_000_000_000 + i * 100, i + 1))
            .collect();
        let path = record(dir.path(), &frames, 10_000);

        let mut reader = MdfReader::open(&path).unwrap();
        assert_eq!(reader.header().frame_count, 10);
        for expected in &frames {
            assert_eq!(reader.read_next().unwrap().unwrap(), *expected);
        }
        assert!(reader.read_next().unwrap().is_none());
    }

    #[test]
    fn test_mixed_frame_types_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let frames = vec![
            l1_frame(100, 1),
            Frame::Trade(TradeBody {
                ts_ns: 200,
                symbol_id: 2,
                price: 5,
                size: 6,
                aggressor_side: 1,
                seq: 2,
            }),
            l1_frame(300, 3),
        ];
        let path = record(dir.path(), &frames, 10_000);

        let mut reader = MdfReader::open(&path).unwrap();
        for expected in &frames {
            assert_eq!(reader.read_next().unwrap().unwrap(), *expected);
        }
    }

    // ---------------------------------------------------------------
    // Seeks (S6 shape: frames at 100..500, sparse index)
    // ---------------------------------------------------------------

    fn seek_fixture(dir: &Path) -> PathBuf {
        // index_interval 2 gives entries at ts 200 and 400; the seek path
        // must scan forward from an indexed frame to the target.
        let frames: Vec<Frame> = [100u64, 200, 300, 400, 500]
            .iter()
            .enumerate()
            .map(|(i, &ts)| l1_frame(ts, i as u64 + 1))
            .collect();
        record(dir, &frames, 2)
    }

    #[test]
    fn test_seek_lands_on_first_frame_at_or_after_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = seek_fixture(dir.path());
        let mut reader = MdfReader::open(&path).unwrap();

        reader.seek_to_ts(250).unwrap();
        assert_eq!(reader.read_next().unwrap().unwrap().ts_ns(), Some(300));
        assert_eq!(reader.read_next().unwrap().unwrap().ts_ns(), Some(400));
    }

    #[test]
    fn test_seek_exact_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = seek_fixture(dir.path());
        let mut reader = MdfReader::open(&path).unwrap();

        reader.seek_to_ts(400).unwrap();
        assert_eq!(reader.read_next().unwrap().unwrap().ts_ns(), Some(400));
    }

    #[test]
    fn test_seek_before_first_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = seek_fixture(dir.path());
        let mut reader = MdfReader::open(&path).unwrap();

        reader.seek_to_ts(50).unwrap();
        assert_eq!(reader.read_next().unwrap().unwrap().ts_ns(), Some(100));
    }

    #[test]
    fn test_seek_past_eof_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = seek_fixture(dir.path());
        let mut reader = MdfReader::open(&path).unwrap();

        assert!(matches!(
            reader.seek_to_ts(9_999),
            Err(Error::SeekPastEof { target: 9_999 })
        ));
    }

    #[test]
    fn test_seek_with_empty_index_scans_from_start() {
        let dir = tempfile::tempdir().unwrap();
        let frames: Vec<Frame> = [100u64, 200, 300]
            .iter()
            .enumerate()
            .map(|(i, &ts)| l1_frame(ts, i as u64 + 1))
            .collect();
        // Interval larger than the frame count: no index entries at all.
        let path = record(dir.path(), &frames, 10_000);

        let mut reader = MdfReader::open(&path).unwrap();
        assert!(reader.index_entries().is_empty());
        reader.seek_to_ts(150).unwrap();
        assert_eq!(reader.read_next().unwrap().unwrap().ts_ns(), Some(200));
    }

    #[test]
    fn test_timestamps_non_decreasing_from_any_seek() {
        let dir = tempfile::tempdir().unwrap();
        let path = seek_fixture(dir.path());

        for target in [100u64, 150, 250, 350, 450, 500] {
            let mut reader = MdfReader::open(&path).unwrap();
            reader.seek_to_ts(target).unwrap();
            let mut last = 0u64;
            while let Some(frame) = reader.read_next().unwrap() {
                let ts = frame.ts_ns().unwrap();
                assert!(ts >= target, "seek({}) yielded frame at {}", target, ts);
                assert!(ts >= last, "timestamps regressed");
                last = ts;
            }
        }
    }

    #[test]
    fn test_open_missing_index_fails() {
        let dir = tempfile::tempdir().unwrap();
        let frames = vec![l1_frame(100, 1)];
        let path = record(dir.path(), &frames, 10_000);
        std::fs::remove_file(idx_path_for(&path)).unwrap();
        assert!(MdfReader::open(&path).is_err());
    }
}
