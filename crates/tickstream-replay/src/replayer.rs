//! Replay Session Manager
//!
//! `start_session` validates the request, locates and opens the recorded
//! pair containing the start timestamp, seeks to the first frame at or after
//! it, registers the session's virtual topic prefix with the publisher and
//! spawns the playback thread. Pause, resume, seek and stop are idempotent
//! on unknown session ids; only `start_session` is strict.
//!
//! The playback loop follows the recorded inter-arrival times: each frame is
//! charged `scaled_delay × 1000` tokens against a bucket refilling at
//! `1000 × rate_multiplier` tokens per second. Sub-millisecond gaps are not
//! paced. When tokens run short the loop sleeps briefly and retries the same
//! frame. Termination (end timestamp, EOF, stop, read error) marks the
//! session not-running and unregisters its prefix; the session stays listed
//! until `stop_session` removes it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::Serialize;
use tickstream_core::frame::Frame;
use tickstream_core::{frame_topic, FramePublisher, SymbolRegistry};
use tickstream_observability::MetricsSink;
use tickstream_pubsub::TopicSubscription;
use tickstream_storage::{find_file_for_timestamp, MdfReader};
use tracing::{info, warn};

use crate::bucket::TokenBucket;
use crate::error::{Error, Result};
use crate::session::{ReplaySession, SessionInfo};

/// Hard cap on live sessions.
pub const MAX_CONCURRENT_SESSIONS: usize = 10;

/// Rate multiplier must lie in `(0, MAX_RATE_MULTIPLIER]`.
pub const MAX_RATE_MULTIPLIER: f64 = 100.0;

const TOKEN_BUCKET_CAPACITY: f64 = 10_000.0;
const TOKEN_REFILL_BASE_PER_SEC: f64 = 1000.0;
const INITIAL_TOKENS: f64 = 1000.0;
const PAUSE_POLL: Duration = Duration::from_millis(100);
const TOKEN_WAIT: Duration = Duration::from_micros(100);

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ReplayerStats {
    pub total_sessions: u64,
    pub active_sessions: u64,
    pub frames_replayed: u64,
}

struct SessionHandle {
    session: Arc<ReplaySession>,
    thread: Option<JoinHandle<()>>,
}

pub struct Replayer {
    data_dir: PathBuf,
    publisher: Arc<dyn FramePublisher>,
    registry: Arc<SymbolRegistry>,
    sink: Arc<MetricsSink>,
    sessions: Mutex<HashMap<String, SessionHandle>>,
    total_sessions: AtomicU64,
}

impl Replayer {
    pub fn new(
        data_dir: PathBuf,
        publisher: Arc<dyn FramePublisher>,
        registry: Arc<SymbolRegistry>,
        sink: Arc<MetricsSink>,
    ) -> Self {
        Self {
            data_dir,
            publisher,
            registry,
            sink,
            sessions: Mutex::new(HashMap::new()),
            total_sessions: AtomicU64::new(0),
        }
    }

    /// Start playback of `[from_ts_ns, to_ts_ns]` for the given topic
    /// patterns at `rate_multiplier` times recorded speed.
    pub fn start_session(
        &self,
        from_ts_ns: u64,
        to_ts_ns: u64,
        topics: Vec<String>,
        rate_multiplier: f64,
    ) -> Result<String> {
        if from_ts_ns >= to_ts_ns {
            return Err(Error::InvalidRange {
                from: from_ts_ns,
                to: to_ts_ns,
            });
        }
        if !rate_multiplier.is_finite()
            || rate_multiplier <= 0.0
            || rate_multiplier > MAX_RATE_MULTIPLIER
        {
            return Err(Error::InvalidRate(rate_multiplier));
        }
        if topics.is_empty() {
            return Err(Error::EmptyTopics);
        }

        let mut sessions = self.sessions.lock().unwrap();
        if sessions.len() >= MAX_CONCURRENT_SESSIONS {
            return Err(Error::TooManySessions(MAX_CONCURRENT_SESSIONS));
        }

        let mdf_path = find_file_for_timestamp(&self.data_dir, from_ts_ns)?;
        let mut reader = MdfReader::open(&mdf_path)?;
        reader.seek_to_ts(from_ts_ns)?;

        let session_id = loop {
            let candidate = format!("rpl_{:08x}", rand::random::<u32>());
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        let session = Arc::new(ReplaySession::new(
            session_id.clone(),
            from_ts_ns,
            to_ts_ns,
            rate_multiplier,
            topics,
        ));

        let prefix = virtual_prefix(&session_id);
        self.publisher.add_virtual_topic_prefix(&prefix);

        let thread = {
            let session = session.clone();
            let publisher = self.publisher.clone();
            let registry = self.registry.clone();
            let sink = self.sink.clone();
            std::thread::Builder::new()
                .name(format!("replay-{}", session_id))
                .spawn(move || playback_loop(session, reader, publisher, registry, sink))
                .expect("spawn replay thread")
        };

        sessions.insert(
            session_id.clone(),
            SessionHandle {
                session,
                thread: Some(thread),
            },
        );
        self.total_sessions.fetch_add(1, Ordering::Relaxed);
        self.sink
            .set_gauge("replayer_active_sessions", sessions.len() as f64);

        info!(
            session = %session_id,
            from = from_ts_ns,
            to = to_ts_ns,
            rate = rate_multiplier,
            file = %mdf_path.display(),
            "replay session started"
        );
        Ok(session_id)
    }

    /// Idempotent: unknown ids are ignored.
    pub fn pause_session(&self, session_id: &str) {
        let sessions = self.sessions.lock().unwrap();
        if let Some(handle) = sessions.get(session_id) {
            handle.session.set_paused(true);
            info!(session = %session_id, "replay session paused");
        }
    }

    /// Idempotent: unknown ids are ignored.
    pub fn resume_session(&self, session_id: &str) {
        let sessions = self.sessions.lock().unwrap();
        if let Some(handle) = sessions.get(session_id) {
            handle.session.set_paused(false);
            info!(session = %session_id, "replay session resumed");
        }
    }

    /// Seek within the session's range. Out-of-range targets and unknown ids
    /// are ignored.
    pub fn seek_session(&self, session_id: &str, ts_ns: u64) {
        let sessions = self.sessions.lock().unwrap();
        if let Some(handle) = sessions.get(session_id) {
            let session = &handle.session;
            if ts_ns >= session.start_ts_ns && ts_ns <= session.end_ts_ns {
                session.request_seek(ts_ns);
                info!(session = %session_id, target = ts_ns, "replay session seek");
            } else {
                warn!(
                    session = %session_id,
                    target = ts_ns,
                    "seek target outside session range, ignored"
                );
            }
        }
    }

    /// Stop and remove a session. Idempotent on unknown ids.
    pub fn stop_session(&self, session_id: &str) {
        let handle = {
            let mut sessions = self.sessions.lock().unwrap();
            let handle = sessions.remove(session_id);
            self.sink
                .set_gauge("replayer_active_sessions", sessions.len() as f64);
            handle
        };
        let Some(mut handle) = handle else {
            return;
        };

        handle.session.mark_stopped();
        if let Some(thread) = handle.thread.take() {
            let _ = thread.join();
        }
        // The playback thread removes the prefix on exit; doing it again here
        // is harmless and covers a thread that never got to run.
        self.publisher
            .remove_virtual_topic_prefix(&virtual_prefix(session_id));
        info!(session = %session_id, "replay session stopped");
    }

    /// Stop every session (shutdown path).
    pub fn stop_all(&self) {
        let ids: Vec<String> = self.sessions.lock().unwrap().keys().cloned().collect();
        for id in ids {
            self.stop_session(&id);
        }
    }

    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.lock().unwrap();
        let mut infos: Vec<SessionInfo> =
            sessions.values().map(|handle| handle.session.info()).collect();
        infos.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        infos
    }

    pub fn stats(&self) -> ReplayerStats {
        ReplayerStats {
            total_sessions: self.total_sessions.load(Ordering::Relaxed),
            active_sessions: self.sessions.lock().unwrap().len() as u64,
            frames_replayed: self.sink.counter("replayer_frames_sent_total"),
        }
    }
}

impl Drop for Replayer {
    fn drop(&mut self) {
        self.stop_all();
    }
}

fn virtual_prefix(session_id: &str) -> String {
    format!("replay.{}", session_id)
}

fn playback_loop(
    session: Arc<ReplaySession>,
    mut reader: MdfReader,
    publisher: Arc<dyn FramePublisher>,
    registry: Arc<SymbolRegistry>,
    sink: Arc<MetricsSink>,
) {
    let subscriptions: Vec<TopicSubscription> = session
        .topics
        .iter()
        .map(|pattern| TopicSubscription::new(pattern.clone(), false))
        .collect();
    let mut bucket = TokenBucket::new(
        TOKEN_BUCKET_CAPACITY,
        TOKEN_REFILL_BASE_PER_SEC * session.rate_multiplier,
        INITIAL_TOKENS,
    );
    let mut prev_ts_ns: Option<u64> = None;
    // Frame deferred by the rate limiter; retried before reading further.
    let mut pending: Option<Frame> = None;

    while session.is_running() {
        if let Some(target) = session.take_seek_request() {
            match reader.seek_to_ts(target) {
                Ok(()) => {
                    session.set_current_ts(target);
                    prev_ts_ns = None;
                    pending = None;
                }
                Err(err) => {
                    warn!(session = %session.session_id, error = %err, "seek failed");
                }
            }
        }

        if session.is_paused() {
            std::thread::sleep(PAUSE_POLL);
            bucket.reset_clock();
            continue;
        }

        let frame = match pending.take() {
            Some(frame) => frame,
            None => match reader.read_next() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    info!(session = %session.session_id, "replay completed: end of data");
                    break;
                }
                Err(err) => {
                    warn!(session = %session.session_id, error = %err, "replay read failed");
                    sink.inc_counter("replayer_read_errors_total", 1);
                    break;
                }
            },
        };

        let ts_ns = frame.ts_ns().unwrap_or(0);
        if ts_ns > session.end_ts_ns {
            info!(session = %session.session_id, "replay completed: end timestamp reached");
            break;
        }
        session.set_current_ts(ts_ns);

        // Pace by the recorded inter-arrival gap, scaled by the multiplier.
        if let Some(prev) = prev_ts_ns {
            let scaled_delay_s =
                ts_ns.saturating_sub(prev) as f64 / 1e9 / session.rate_multiplier;
            if scaled_delay_s > 0.001 {
                let tokens_needed = scaled_delay_s * 1000.0;
                if !bucket.try_consume(tokens_needed) {
                    pending = Some(frame);
                    std::thread::sleep(TOKEN_WAIT);
                    continue;
                }
            }
        }
        prev_ts_ns = Some(ts_ns);

        if let Some(base_topic) = frame_topic(&frame, &registry) {
            if subscriptions.iter().any(|sub| sub.matches(&base_topic)) {
                let topic = format!("replay.{}.{}", session.session_id, base_topic);
                publisher.publish(&topic, &frame);
                session.inc_frames_sent();
                sink.inc_counter("replayer_frames_sent_total", 1);
            }
        }
    }

    session.mark_stopped();
    publisher.remove_virtual_topic_prefix(&virtual_prefix(&session.session_id));
    info!(
        session = %session.session_id,
        frames = session.frames_sent(),
        "playback finished"
    );
}
