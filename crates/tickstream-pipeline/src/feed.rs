//! Raw Event Contract and Synthetic Feed
//!
//! [`RawEvent`] is the ingress contract of the pipeline: whatever produces
//! market data (the synthetic feed here, an exchange connector elsewhere)
//! pushes these onto the feed queue. Every event carries the symbol string,
//! a nanosecond timestamp and a per-source monotone sequence number.
//!
//! [`MockFeed`] is a single producer thread that random-walks a mid price per
//! symbol and emits L1 quotes, L2 book deltas and trades at configurable
//! per-type rates (events/second across all symbols). Every 15 seconds it
//! enters a 1-second burst at 10x the configured rates to exercise
//! backpressure downstream.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crossbeam_channel::Sender;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tickstream_core::frame::{AggressorSide, BookAction, Side};
use tickstream_observability::MetricsSink;
use tracing::info;

/// Event payload by market-data type.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    L1 {
        bid_price: f64,
        bid_size: f64,
        ask_price: f64,
        ask_size: f64,
    },
    L2 {
        side: Side,
        action: BookAction,
        level: u16,
        price: f64,
        size: f64,
    },
    Trade {
        price: f64,
        size: f64,
        aggressor: AggressorSide,
    },
}

/// A raw market event as produced by a feed source.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub symbol: String,
    pub ts_ns: u64,
    /// Monotonically increasing per source.
    pub seq: u64,
    pub kind: EventKind,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FeedStats {
    pub l1_count: u64,
    pub l2_count: u64,
    pub trade_count: u64,
    pub total_events: u64,
    pub dropped: u64,
    pub running: bool,
}

#[derive(Default)]
struct Counters {
    l1: AtomicU64,
    l2: AtomicU64,
    trade: AtomicU64,
    dropped: AtomicU64,
}

const BOOK_DEPTH: usize = 10;
const BURST_PERIOD: Duration = Duration::from_secs(15);
const BURST_DURATION: Duration = Duration::from_secs(1);
const BURST_MULTIPLIER: u32 = 10;

/// Per-symbol generator state: random-walked mid price, volatility-coupled
/// spread and a small synthetic book.
struct SymbolState {
    mid_price: f64,
    spread: f64,
    bids: Vec<(f64, f64)>,
    asks: Vec<(f64, f64)>,
    seq: u64,
    rng: StdRng,
}

impl SymbolState {
    fn new(seed: u64) -> Self {
        let mut state = Self {
            mid_price: 100.0,
            spread: 0.01,
            bids: Vec::with_capacity(BOOK_DEPTH),
            asks: Vec::with_capacity(BOOK_DEPTH),
            seq: 1,
            rng: StdRng::seed_from_u64(seed),
        };
        let bid_base = state.mid_price - state.spread / 2.0;
        let ask_base = state.mid_price + state.spread / 2.0;
        for level in 0..BOOK_DEPTH {
            let size = state.sample_exponential() * 100.0;
            state.bids.push((bid_base - level as f64 * 0.01, size));
            state.asks.push((ask_base + level as f64 * 0.01, size));
        }
        state
    }

    /// Standard normal via the Box-Muller transform.
    fn sample_normal(&mut self) -> f64 {
        let u1: f64 = self.rng.gen_range(f64::MIN_POSITIVE..1.0);
        let u2: f64 = self.rng.gen();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }

    fn sample_exponential(&mut self) -> f64 {
        let u: f64 = self.rng.gen_range(f64::MIN_POSITIVE..1.0);
        -u.ln()
    }

    fn walk(&mut self) -> f64 {
        let change = self.sample_normal() * 0.001 * self.mid_price / 100.0;
        self.mid_price = (self.mid_price + change).max(0.01);
        self.spread = (0.01 + change.abs() * 10.0).max(0.001);
        change
    }
}

/// Synthetic market-data generator.
pub struct MockFeed {
    symbols: Vec<String>,
    tx: Sender<RawEvent>,
    sink: Arc<MetricsSink>,
    running: Arc<AtomicBool>,
    l1_rate: Arc<AtomicU32>,
    l2_rate: Arc<AtomicU32>,
    trade_rate: Arc<AtomicU32>,
    counters: Arc<Counters>,
    handle: Option<JoinHandle<()>>,
}

impl MockFeed {
    pub fn new(symbols: Vec<String>, tx: Sender<RawEvent>, sink: Arc<MetricsSink>) -> Self {
        Self {
            symbols,
            tx,
            sink,
            running: Arc::new(AtomicBool::new(false)),
            l1_rate: Arc::new(AtomicU32::new(50_000)),
            l2_rate: Arc::new(AtomicU32::new(30_000)),
            trade_rate: Arc::new(AtomicU32::new(5_000)),
            counters: Arc::new(Counters::default()),
            handle: None,
        }
    }

    pub fn set_rates(&self, l1_per_sec: u32, l2_per_sec: u32, trade_per_sec: u32) {
        self.l1_rate.store(l1_per_sec, Ordering::Relaxed);
        self.l2_rate.store(l2_per_sec, Ordering::Relaxed);
        self.trade_rate.store(trade_per_sec, Ordering::Relaxed);
        info!(
            l1 = l1_per_sec,
            l2 = l2_per_sec,
            trade = trade_per_sec,
            "feed rates updated"
        );
    }

    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let worker = Worker {
            symbols: self.symbols.clone(),
            states: self
                .symbols
                .iter()
                .enumerate()
                .map(|(i, _)| SymbolState::new(i as u64 + 12345))
                .collect(),
            tx: self.tx.clone(),
            sink: self.sink.clone(),
            running: self.running.clone(),
            l1_rate: self.l1_rate.clone(),
            l2_rate: self.l2_rate.clone(),
            trade_rate: self.trade_rate.clone(),
            counters: self.counters.clone(),
        };
        self.handle = Some(
            std::thread::Builder::new()
                .name("mock-feed".into())
                .spawn(move || worker.run())
                .expect("spawn feed thread"),
        );
        info!(symbols = self.symbols.len(), "mock feed started");
    }

    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        info!("mock feed stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> FeedStats {
        let l1 = self.counters.l1.load(Ordering::Relaxed);
        let l2 = self.counters.l2.load(Ordering::Relaxed);
        let trade = self.counters.trade.load(Ordering::Relaxed);
        FeedStats {
            l1_count: l1,
            l2_count: l2,
            trade_count: trade,
            total_events: l1 + l2 + trade,
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            running: self.is_running(),
        }
    }
}

impl Drop for MockFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    symbols: Vec<String>,
    states: Vec<SymbolState>,
    tx: Sender<RawEvent>,
    sink: Arc<MetricsSink>,
    running: Arc<AtomicBool>,
    l1_rate: Arc<AtomicU32>,
    l2_rate: Arc<AtomicU32>,
    trade_rate: Arc<AtomicU32>,
    counters: Arc<Counters>,
}

impl Worker {
    fn run(mut self) {
        if self.symbols.is_empty() {
            return;
        }
        let tick = Duration::from_millis(1);
        let mut burst_until: Option<Instant> = None;
        let mut last_burst = Instant::now();
        // Fractional events carried across 1ms ticks so low rates still emit.
        let (mut l1_acc, mut l2_acc, mut trade_acc) = (0.0f64, 0.0f64, 0.0f64);

        while self.running.load(Ordering::Relaxed) {
            let tick_start = Instant::now();

            if tick_start.duration_since(last_burst) >= BURST_PERIOD {
                burst_until = Some(tick_start + BURST_DURATION);
                last_burst = tick_start;
            }
            let bursting = burst_until.map(|until| tick_start < until).unwrap_or(false);
            let multiplier = if bursting { BURST_MULTIPLIER } else { 1 };

            l1_acc += (self.l1_rate.load(Ordering::Relaxed) * multiplier) as f64 / 1000.0;
            l2_acc += (self.l2_rate.load(Ordering::Relaxed) * multiplier) as f64 / 1000.0;
            trade_acc += (self.trade_rate.load(Ordering::Relaxed) * multiplier) as f64 / 1000.0;

            let l1_events = l1_acc as u64;
            let l2_events = l2_acc as u64;
            let trade_events = trade_acc as u64;
            l1_acc -= l1_events as f64;
            l2_acc -= l2_events as f64;
            trade_acc -= trade_events as f64;

            for i in 0..l1_events {
                self.emit_l1((i % self.symbols.len() as u64) as usize);
            }
            for i in 0..l2_events {
                self.emit_l2((i % self.symbols.len() as u64) as usize);
            }
            for i in 0..trade_events {
                self.emit_trade((i % self.symbols.len() as u64) as usize);
            }

            let elapsed = tick_start.elapsed();
            if elapsed < tick {
                std::thread::sleep(tick - elapsed);
            }
        }
    }

    fn emit_l1(&mut self, idx: usize) {
        let state = &mut self.states[idx];
        state.walk();
        let bid_price = state.mid_price - state.spread / 2.0;
        let ask_price = state.mid_price + state.spread / 2.0;
        let bid_size = state.sample_exponential() * 1000.0;
        let ask_size = state.sample_exponential() * 1000.0;
        state.bids[0] = (bid_price, bid_size);
        state.asks[0] = (ask_price, ask_size);
        let seq = state.seq;
        state.seq += 1;

        let event = RawEvent {
            symbol: self.symbols[idx].clone(),
            ts_ns: now_ns(),
            seq,
            kind: EventKind::L1 {
                bid_price,
                bid_size,
                ask_price,
                ask_size,
            },
        };
        self.push(event, &self.counters.l1, "mock_feed_l1_total");
    }

    fn emit_l2(&mut self, idx: usize) {
        let state = &mut self.states[idx];
        let level = state.rng.gen_range(0..BOOK_DEPTH as u16);
        let side = if state.rng.gen_bool(0.5) {
            Side::Bid
        } else {
            Side::Ask
        };
        let action = match state.rng.gen_range(0..3u8) {
            0 => BookAction::Insert,
            1 => BookAction::Update,
            _ => BookAction::Delete,
        };
        let sampled_size = state.sample_exponential() * 100.0;
        let book = match side {
            Side::Bid => &mut state.bids,
            Side::Ask => &mut state.asks,
        };
        let price = book[level as usize].0;
        let size = if action == BookAction::Delete {
            0.0
        } else {
            book[level as usize].1 = sampled_size;
            sampled_size
        };
        let seq = state.seq;
        state.seq += 1;

        let event = RawEvent {
            symbol: self.symbols[idx].clone(),
            ts_ns: now_ns(),
            seq,
            kind: EventKind::L2 {
                side,
                action,
                level,
                price,
                size,
            },
        };
        self.push(event, &self.counters.l2, "mock_feed_l2_total");
    }

    fn emit_trade(&mut self, idx: usize) {
        let state = &mut self.states[idx];
        let aggressor = if state.rng.gen_bool(0.5) {
            AggressorSide::Buy
        } else {
            AggressorSide::Sell
        };
        let price = match aggressor {
            AggressorSide::Buy => state.asks[0].0,
            _ => state.bids[0].0,
        };
        let size = state.sample_exponential() * 10.0;
        let seq = state.seq;
        state.seq += 1;

        let event = RawEvent {
            symbol: self.symbols[idx].clone(),
            ts_ns: now_ns(),
            seq,
            kind: EventKind::Trade {
                price,
                size,
                aggressor,
            },
        };
        self.push(event, &self.counters.trade, "mock_feed_trade_total");
    }

    fn push(&self, event: RawEvent, counter: &AtomicU64, metric: &str) {
        match self.tx.try_send(event) {
            Ok(()) => {
                counter.fetch_add(1, Ordering::Relaxed);
                self.sink.inc_counter(metric, 1);
            }
            Err(_) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                self.sink.inc_counter("mock_feed_dropped_queue_full", 1);
            }
        }
    }
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}
