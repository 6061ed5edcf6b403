//! Replay Session State
//!
//! Shared between the session manager (control plane) and the session's
//! playback thread: immutable parameters plus atomic progress fields. Seeks
//! requested mid-playback are parked here and applied by the playback thread
//! at the top of its loop, so the reader stays owned by a single thread.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

pub struct ReplaySession {
    pub session_id: String,
    pub start_ts_ns: u64,
    pub end_ts_ns: u64,
    pub rate_multiplier: f64,
    pub topics: Vec<String>,
    current_ts_ns: AtomicU64,
    frames_sent: AtomicU64,
    running: AtomicBool,
    paused: AtomicBool,
    seek_request: Mutex<Option<u64>>,
}

impl ReplaySession {
    pub fn new(
        session_id: String,
        start_ts_ns: u64,
        end_ts_ns: u64,
        rate_multiplier: f64,
        topics: Vec<String>,
    ) -> Self {
        Self {
            session_id,
            start_ts_ns,
            end_ts_ns,
            rate_multiplier,
            topics,
            current_ts_ns: AtomicU64::new(start_ts_ns),
            frames_sent: AtomicU64::new(0),
            running: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            seek_request: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn current_ts_ns(&self) -> u64 {
        self.current_ts_ns.load(Ordering::Relaxed)
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub(crate) fn set_current_ts(&self, ts_ns: u64) {
        self.current_ts_ns.store(ts_ns, Ordering::Relaxed);
    }

    pub(crate) fn inc_frames_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn mark_stopped(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    /// Park a validated seek target for the playback thread.
    pub(crate) fn request_seek(&self, ts_ns: u64) {
        *self.seek_request.lock().unwrap() = Some(ts_ns);
    }

    pub(crate) fn take_seek_request(&self) -> Option<u64> {
        self.seek_request.lock().unwrap().take()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id.clone(),
            start_ts_ns: self.start_ts_ns,
            end_ts_ns: self.end_ts_ns,
            current_ts_ns: self.current_ts_ns(),
            rate_multiplier: self.rate_multiplier,
            running: self.is_running(),
            paused: self.is_paused(),
            frames_sent: self.frames_sent(),
            topics: self.topics.clone(),
        }
    }
}

/// Control-plane snapshot of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub start_ts_ns: u64,
    pub end_ts_ns: u64,
    pub current_ts_ns: u64,
    pub rate_multiplier: f64,
    pub running: bool,
    pub paused: bool,
    pub frames_sent: u64,
    pub topics: Vec<String>,
}
