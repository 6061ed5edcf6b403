//! Core Wiring and Control API
//!
//! [`MarketDataCore`] owns the whole data plane: the bounded queues, the
//! symbol registry and metrics sink, and every component from the feed to
//! the replayer. It exposes the operations an external control plane invokes
//! (feed lifecycle and rate knobs, symbol listing, replay session lifecycle,
//! health and metrics snapshots) as plain in-process calls.
//!
//! Start order: normalizer, publisher, recorder, distribution, feed — so
//! downstream stages are draining before producers start. Stop reverses it.
//! A publisher bind failure degrades the component (health gauge set, error
//! logged) without taking the rest of the pipeline down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{bounded, Sender};
use serde::Serialize;
use tickstream_core::{FramePublisher, SymbolRegistry};
use tickstream_observability::{MetricsSink, MetricsSnapshot};
use tickstream_pipeline::{
    DistributionStage, FeedStats, MockFeed, NormalizerPool, NormalizerStats, RawEvent,
};
use tickstream_pubsub::{PubServer, PubServerConfig, PubServerStats};
use tickstream_replay::{Replayer, ReplayerStats, SessionInfo};
use tickstream_storage::{Recorder, RecorderConfig, RecorderStats};
use tracing::{error, info};

use crate::config::Config;

/// Per-component health view served to the control plane.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub feed: FeedStats,
    pub normalizer: NormalizerStats,
    pub recorder: RecorderStats,
    pub publisher: PubServerStats,
    pub publisher_degraded: bool,
    pub replayer: ReplayerStats,
    pub symbol_count: usize,
}

pub struct MarketDataCore {
    config: Config,
    registry: Arc<SymbolRegistry>,
    sink: Arc<MetricsSink>,
    feed: Mutex<MockFeed>,
    feed_tx: Sender<RawEvent>,
    normalizer: Mutex<NormalizerPool>,
    distribution: Mutex<DistributionStage>,
    recorder: Mutex<Recorder>,
    publisher: Arc<PubServer>,
    publisher_degraded: AtomicBool,
    replayer: Arc<Replayer>,
    running: AtomicBool,
}

impl MarketDataCore {
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(SymbolRegistry::new());
        let sink = Arc::new(MetricsSink::new());

        let (feed_tx, feed_rx) = bounded::<RawEvent>(config.pipeline.feed_queue_capacity);
        let (frame_tx, frame_rx) = bounded(config.pipeline.frame_queue_capacity);
        let (recorder_tx, recorder_rx) = bounded(config.pipeline.recorder_queue_capacity);

        let feed = MockFeed::new(config.feeds.symbols.clone(), feed_tx.clone(), sink.clone());
        feed.set_rates(
            config.feeds.l1_rate,
            config.feeds.l2_rate,
            config.feeds.trade_rate,
        );

        let normalizer =
            NormalizerPool::new(feed_rx, frame_tx, registry.clone(), sink.clone());

        let publisher = PubServer::new(
            PubServerConfig {
                port: config.network.pubsub_port,
                auth_token: config.security.token.clone(),
            },
            sink.clone(),
        );

        let recorder = Recorder::new(
            RecorderConfig {
                data_dir: config.storage.dir.clone(),
                roll_bytes: config.storage.roll_bytes,
                index_interval: config.storage.index_interval,
                fsync_interval: config.storage.fsync_interval(),
            },
            recorder_rx,
            sink.clone(),
        );

        let distribution = DistributionStage::new(
            frame_rx,
            recorder_tx,
            publisher.clone() as Arc<dyn FramePublisher>,
            registry.clone(),
            sink.clone(),
        );

        let replayer = Arc::new(Replayer::new(
            config.storage.dir.clone(),
            publisher.clone() as Arc<dyn FramePublisher>,
            registry.clone(),
            sink.clone(),
        ));

        Self {
            config,
            registry,
            sink,
            feed: Mutex::new(feed),
            feed_tx,
            normalizer: Mutex::new(normalizer),
            distribution: Mutex::new(distribution),
            recorder: Mutex::new(recorder),
            publisher,
            publisher_degraded: AtomicBool::new(false),
            replayer,
            running: AtomicBool::new(false),
        }
    }

    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("starting market-data core");

        self.normalizer
            .lock()
            .unwrap()
            .start(self.config.pipeline.normalizer_threads);

        if let Err(err) = self.publisher.start() {
            // Degraded but alive: recording still works without the
            // pub-sub surface.
            error!(error = %err, "publisher failed to start, running degraded");
            self.publisher_degraded.store(true, Ordering::SeqCst);
            self.sink.set_gauge("publisher_health_degraded", 1.0);
        }

        self.recorder.lock().unwrap().start();
        self.distribution.lock().unwrap().start();

        if self.config.feeds.mock_enabled {
            self.feed.lock().unwrap().start();
        }
        info!("market-data core started");
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("stopping market-data core");

        self.feed.lock().unwrap().stop();
        self.distribution.lock().unwrap().stop();
        self.normalizer.lock().unwrap().stop();
        self.recorder.lock().unwrap().stop();
        self.replayer.stop_all();
        self.publisher.stop();

        info!("market-data core stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    // ---- Feed lifecycle pass-through ----

    pub fn feed_start(&self) {
        self.feed.lock().unwrap().start();
    }

    pub fn feed_stop(&self) {
        self.feed.lock().unwrap().stop();
    }

    pub fn feed_set_rates(&self, l1_per_sec: u32, l2_per_sec: u32, trade_per_sec: u32) {
        self.feed
            .lock()
            .unwrap()
            .set_rates(l1_per_sec, l2_per_sec, trade_per_sec);
    }

    /// Ingress used by non-mock sources (and tests) to push raw events.
    pub fn event_sender(&self) -> Sender<RawEvent> {
        self.feed_tx.clone()
    }

    // ---- Symbols ----

    pub fn list_symbols(&self) -> Vec<(u32, String)> {
        self.registry.list_all()
    }

    // ---- Replay session lifecycle ----

    pub fn replay_start(
        &self,
        from_ts_ns: u64,
        to_ts_ns: u64,
        topics: Vec<String>,
        rate_multiplier: f64,
    ) -> tickstream_replay::Result<String> {
        self.replayer
            .start_session(from_ts_ns, to_ts_ns, topics, rate_multiplier)
    }

    pub fn replay_pause(&self, session_id: &str) {
        self.replayer.pause_session(session_id);
    }

    pub fn replay_resume(&self, session_id: &str) {
        self.replayer.resume_session(session_id);
    }

    pub fn replay_seek(&self, session_id: &str, ts_ns: u64) {
        self.replayer.seek_session(session_id, ts_ns);
    }

    pub fn replay_stop(&self, session_id: &str) {
        self.replayer.stop_session(session_id);
    }

    pub fn replay_sessions(&self) -> Vec<SessionInfo> {
        self.replayer.list_sessions()
    }

    // ---- Recorder ----

    pub fn recorder_force_roll(&self) {
        self.recorder.lock().unwrap().force_roll();
    }

    // ---- Observability ----

    pub fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            feed: self.feed.lock().unwrap().stats(),
            normalizer: self.normalizer.lock().unwrap().stats(),
            recorder: self.recorder.lock().unwrap().stats(),
            publisher: self.publisher.stats(),
            publisher_degraded: self.publisher_degraded.load(Ordering::Relaxed),
            replayer: self.replayer.stats(),
            symbol_count: self.registry.len(),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.sink.snapshot()
    }

    /// Bound pub-sub address (None while degraded).
    pub fn publisher_addr(&self) -> Option<std::net::SocketAddr> {
        self.publisher.local_addr()
    }
}

impl Drop for MarketDataCore {
    fn drop(&mut self) {
        self.stop();
    }
}
