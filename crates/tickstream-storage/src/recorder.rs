//! Recorder
//!
//! Single writer thread consuming frames from a bounded queue and appending
//! them to the current `.mdf`/`.idx` pair.
//!
//! Per frame: decide whether to roll (no file open, size limit would be
//! exceeded, or a roll was forced), append the encoded frame, update running
//! counters, and every `index_interval` frames append an index entry pointing
//! at the frame start. The `MdfHeader` is rewritten in place every 1000
//! frames and once more on close, so `frame_count`/`end_ts_ns` are exact for
//! closed files and at most 1000 frames stale for the live one.
//!
//! Durability: writes mark the pair dirty; at most every `fsync_interval` the
//! writer flushes and syncs both files. There is no per-frame fsync — the
//! crash-loss window is bounded by the interval. A final sync runs on close
//! and on shutdown.
//!
//! Failure semantics: a failed open leaves the recorder closed (the next
//! frame retries); a failed append is logged and counted and the frame's
//! stats are not incremented.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};
use crossbeam_channel::Receiver;
use serde::Serialize;
use tickstream_core::frame::Frame;
use tickstream_core::codec;
use tickstream_observability::MetricsSink;
use tracing::{error, info};

use crate::mdf::{IndexEntry, MdfHeader, MDF_HEADER_LEN};

const BATCH_SIZE: usize = 100;
const EMPTY_BACKOFF: Duration = Duration::from_micros(100);
const HEADER_REWRITE_EVERY: u32 = 1000;

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub data_dir: PathBuf,
    /// Roll to a new file pair once the current `.mdf` would exceed this.
    pub roll_bytes: u64,
    /// Append an index entry every this many frames.
    pub index_interval: u32,
    /// Upper bound between fsyncs of a dirty file pair.
    pub fsync_interval: Duration,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            roll_bytes: 2 * 1024 * 1024 * 1024,
            index_interval: 10_000,
            fsync_interval: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RecorderStats {
    pub frames_written: u64,
    pub bytes_written: u64,
    pub fsyncs_total: u64,
    pub files_rolled: u64,
    pub open_errors: u64,
    pub write_errors: u64,
    pub is_recording: bool,
}

#[derive(Default)]
struct Counters {
    frames_written: AtomicU64,
    bytes_written: AtomicU64,
    fsyncs_total: AtomicU64,
    files_rolled: AtomicU64,
    open_errors: AtomicU64,
    write_errors: AtomicU64,
}

pub struct Recorder {
    config: RecorderConfig,
    rx: Receiver<Frame>,
    sink: Arc<MetricsSink>,
    running: Arc<AtomicBool>,
    force_roll: Arc<AtomicBool>,
    counters: Arc<Counters>,
    handle: Option<JoinHandle<()>>,
}

impl Recorder {
    pub fn new(config: RecorderConfig, rx: Receiver<Frame>, sink: Arc<MetricsSink>) -> Self {
        Self {
            config,
            rx,
            sink,
            running: Arc::new(AtomicBool::new(false)),
            force_roll: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
            handle: None,
        }
    }

    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut writer = Writer {
            config: self.config.clone(),
            rx: self.rx.clone(),
            sink: self.sink.clone(),
            running: self.running.clone(),
            force_roll: self.force_roll.clone(),
            counters: self.counters.clone(),
            open: None,
            dirty: false,
            last_sync: Instant::now(),
        };
        self.handle = Some(
            std::thread::Builder::new()
                .name("recorder".into())
                .spawn(move || writer.run())
                .expect("spawn recorder thread"),
        );
        info!(data_dir = %self.config.data_dir.display(), "recorder started");
    }

    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        info!("recorder stopped");
    }

    /// Close the current pair before the next frame regardless of size.
    pub fn force_roll(&self) {
        self.force_roll.store(true, Ordering::SeqCst);
    }

    pub fn stats(&self) -> RecorderStats {
        RecorderStats {
            frames_written: self.counters.frames_written.load(Ordering::Relaxed),
            bytes_written: self.counters.bytes_written.load(Ordering::Relaxed),
            fsyncs_total: self.counters.fsyncs_total.load(Ordering::Relaxed),
            files_rolled: self.counters.files_rolled.load(Ordering::Relaxed),
            open_errors: self.counters.open_errors.load(Ordering::Relaxed),
            write_errors: self.counters.write_errors.load(Ordering::Relaxed),
            is_recording: self.running.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.stop();
    }
}

struct OpenPair {
    mdf: File,
    idx: File,
    mdf_path: PathBuf,
    start_ts_ns: u64,
    last_ts_ns: u64,
    bytes_written: u64,
    frame_count: u32,
    frames_since_index: u32,
}

struct Writer {
    config: RecorderConfig,
    rx: Receiver<Frame>,
    sink: Arc<MetricsSink>,
    running: Arc<AtomicBool>,
    force_roll: Arc<AtomicBool>,
    counters: Arc<Counters>,
    open: Option<OpenPair>,
    dirty: bool,
    last_sync: Instant,
}

impl Writer {
    fn run(&mut self) {
        let mut batch = Vec::with_capacity(BATCH_SIZE);

        while self.running.load(Ordering::Relaxed) {
            batch.clear();
            while batch.len() < BATCH_SIZE {
                match self.rx.try_recv() {
                    Ok(frame) => batch.push(frame),
                    Err(_) => break,
                }
            }

            if batch.is_empty() {
                self.maybe_sync();
                std::thread::sleep(EMPTY_BACKOFF);
                continue;
            }

            let dequeued = batch.len() as u64;
            let sink = self.sink.clone();
            for frame in batch.drain(..) {
                let _timer = sink.latency_timer("recorder_write_frame_ns");
                self.write_frame(&frame);
            }
            self.maybe_sync();
            self.sink.inc_counter("recorder_frames_total", dequeued);
        }

        // Final header update and sync on shutdown.
        self.close_current();
    }

    fn write_frame(&mut self, frame: &Frame) {
        let encoded = codec::encode(frame);
        let ts_ns = frame
            .ts_ns()
            .unwrap_or_else(|| self.open.as_ref().map(|o| o.last_ts_ns).unwrap_or(0));

        // Roll decision
        let forced = self.force_roll.swap(false, Ordering::SeqCst);
        let needs_roll = match &self.open {
            None => true,
            Some(pair) => {
                forced || pair.bytes_written + encoded.len() as u64 > self.config.roll_bytes
            }
        };
        if needs_roll {
            let had_open = self.open.is_some();
            self.close_current();
            match self.open_new(ts_ns) {
                Ok(pair) => {
                    self.open = Some(pair);
                    if had_open {
                        self.counters.files_rolled.fetch_add(1, Ordering::Relaxed);
                        self.sink.inc_counter("recorder_files_rolled_total", 1);
                    }
                }
                Err(err) => {
                    error!(error = %err, "failed to open recording files");
                    self.counters.open_errors.fetch_add(1, Ordering::Relaxed);
                    self.sink.inc_counter("recorder_open_errors_total", 1);
                    return; // stay closed, retry on the next frame
                }
            }
        }

        let Some(pair) = self.open.as_mut() else {
            return;
        };
        let frame_offset = pair.bytes_written;

        if let Err(err) = pair.mdf.write_all(&encoded) {
            error!(error = %err, path = %pair.mdf_path.display(), "frame write failed");
            self.counters.write_errors.fetch_add(1, Ordering::Relaxed);
            self.sink.inc_counter("recorder_write_errors_total", 1);
            return;
        }

        pair.bytes_written += encoded.len() as u64;
        pair.frame_count += 1;
        pair.frames_since_index += 1;
        pair.last_ts_ns = ts_ns;
        self.dirty = true;

        self.counters.frames_written.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_written
            .fetch_add(encoded.len() as u64, Ordering::Relaxed);

        if pair.frames_since_index >= self.config.index_interval {
            let entry = IndexEntry {
                ts_ns_first: ts_ns,
                file_offset: frame_offset,
            };
            if let Err(err) = pair.idx.write_all(&entry.encode()) {
                error!(error = %err, "index write failed");
                self.counters.write_errors.fetch_add(1, Ordering::Relaxed);
                self.sink.inc_counter("recorder_write_errors_total", 1);
            }
            pair.frames_since_index = 0;
        }

        if pair.frame_count % HEADER_REWRITE_EVERY == 0 {
            Self::rewrite_header(pair, &self.counters, &self.sink);
        }
    }

    fn open_new(&self, ts_ns: u64) -> std::io::Result<OpenPair> {
        std::fs::create_dir_all(&self.config.data_dir)?;

        let (mdf_path, idx_path) = self.pick_paths(ts_ns);
        let mut mdf = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&mdf_path)?;
        let idx = match OpenOptions::new().create_new(true).write(true).open(&idx_path) {
            Ok(file) => file,
            Err(err) => {
                let _ = std::fs::remove_file(&mdf_path);
                return Err(err);
            }
        };

        let header = MdfHeader {
            start_ts_ns: ts_ns,
            end_ts_ns: ts_ns,
            symbol_count: 0,
            frame_count: 0,
        };
        mdf.write_all(&header.encode())?;

        info!(path = %mdf_path.display(), "opened new recording files");
        Ok(OpenPair {
            mdf,
            idx,
            mdf_path,
            start_ts_ns: ts_ns,
            last_ts_ns: ts_ns,
            bytes_written: MDF_HEADER_LEN as u64,
            frame_count: 0,
            frames_since_index: 0,
        })
    }

    /// Base name from the frame's UTC wall-clock second; two rolls within the
    /// same second get a monotonic suffix instead of clobbering each other.
    fn pick_paths(&self, ts_ns: u64) -> (PathBuf, PathBuf) {
        let stamp = format_utc_second(ts_ns);
        let mut suffix = 0u32;
        loop {
            let base = if suffix == 0 {
                format!("md_{}", stamp)
            } else {
                format!("md_{}_{}", stamp, suffix)
            };
            let mdf_path = self.config.data_dir.join(format!("{}.mdf", base));
            let idx_path = self.config.data_dir.join(format!("{}.idx", base));
            if !mdf_path.exists() && !idx_path.exists() {
                return (mdf_path, idx_path);
            }
            suffix += 1;
        }
    }

    fn rewrite_header(pair: &mut OpenPair, counters: &Counters, sink: &MetricsSink) {
        let header = MdfHeader {
            start_ts_ns: pair.start_ts_ns,
            end_ts_ns: pair.last_ts_ns,
            symbol_count: 0,
            frame_count: pair.frame_count,
        };
        let result = pair
            .mdf
            .seek(SeekFrom::Start(0))
            .and_then(|_| pair.mdf.write_all(&header.encode()))
            .and_then(|_| pair.mdf.seek(SeekFrom::Start(pair.bytes_written)));
        if let Err(err) = result {
            error!(error = %err, "header rewrite failed");
            counters.write_errors.fetch_add(1, Ordering::Relaxed);
            sink.inc_counter("recorder_write_errors_total", 1);
        }
    }

    fn close_current(&mut self) {
        if let Some(mut pair) = self.open.take() {
            Self::rewrite_header(&mut pair, &self.counters, &self.sink);
            let _ = pair.mdf.sync_all();
            let _ = pair.idx.sync_all();
            self.dirty = false;
            self.last_sync = Instant::now();
            info!(
                path = %pair.mdf_path.display(),
                frames = pair.frame_count,
                bytes = pair.bytes_written,
                "closed recording files"
            );
        }
    }

    fn maybe_sync(&mut self) {
        if !self.dirty || self.last_sync.elapsed() < self.config.fsync_interval {
            return;
        }
        if let Some(pair) = self.open.as_mut() {
            let result = pair
                .mdf
                .flush()
                .and_then(|_| pair.mdf.sync_all())
                .and_then(|_| pair.idx.sync_all());
            match result {
                Ok(()) => {
                    self.counters.fsyncs_total.fetch_add(1, Ordering::Relaxed);
                    self.sink.inc_counter("recorder_fsyncs_total", 1);
                }
                Err(err) => {
                    error!(error = %err, "fsync failed");
                    self.counters.write_errors.fetch_add(1, Ordering::Relaxed);
                    self.sink.inc_counter("recorder_write_errors_total", 1);
                }
            }
        }
        self.last_sync = Instant::now();
        self.dirty = false;
    }
}

fn format_utc_second(ts_ns: u64) -> String {
    let secs = (ts_ns / 1_000_000_000) as i64;
    match Utc.timestamp_opt(secs, 0).single() {
        Some(dt) => dt.format("%Y%m%d_%H%M%S").to_string(),
        None => format!("epoch{}", secs),
    }
}
