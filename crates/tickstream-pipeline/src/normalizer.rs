//! Normalizer Pool
//!
//! N worker threads drain the raw-event queue in batches (up to 100 events or
//! queue-empty), convert each event into a wire frame with fixed-point fields
//! and a registry-resolved symbol id, and push the frame onto the egress
//! queue. Workers back off with a short sleep when the ingress is empty
//! instead of busy-spinning.
//!
//! Conversion errors (non-finite inputs, fixed-point overflow, negative
//! sizes) are counted under `normalizer_errors_total` and the event is
//! dropped; nothing propagates past the worker.
//!
//! Ordering: within one symbol and one worker, output preserves the input
//! sequence. Across workers per-symbol order may interleave; consumers order
//! by `seq`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;
use tickstream_core::frame::{Frame, L1Body, L2Body, TradeBody, FIXED_POINT_SCALE};
use tickstream_core::SymbolRegistry;
use tickstream_observability::MetricsSink;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::feed::{EventKind, RawEvent};

const BATCH_SIZE: usize = 100;
const EMPTY_BACKOFF: Duration = Duration::from_micros(100);

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct NormalizerStats {
    pub events_processed: u64,
    pub frames_output: u64,
    pub errors: u64,
}

#[derive(Default)]
struct Counters {
    events_processed: AtomicU64,
    frames_output: AtomicU64,
    errors: AtomicU64,
}

pub struct NormalizerPool {
    rx: Receiver<RawEvent>,
    tx: Sender<Frame>,
    registry: Arc<SymbolRegistry>,
    sink: Arc<MetricsSink>,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    workers: Vec<JoinHandle<()>>,
}

impl NormalizerPool {
    pub fn new(
        rx: Receiver<RawEvent>,
        tx: Sender<Frame>,
        registry: Arc<SymbolRegistry>,
        sink: Arc<MetricsSink>,
    ) -> Self {
        Self {
            rx,
            tx,
            registry,
            sink,
            running: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
            workers: Vec::new(),
        }
    }

    pub fn start(&mut self, num_threads: usize) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        for i in 0..num_threads.max(1) {
            let rx = self.rx.clone();
            let tx = self.tx.clone();
            let registry = self.registry.clone();
            let sink = self.sink.clone();
            let running = self.running.clone();
            let counters = self.counters.clone();
            let handle = std::thread::Builder::new()
                .name(format!("normalizer-{}", i))
                .spawn(move || worker_loop(rx, tx, registry, sink, running, counters))
                .expect("spawn normalizer worker");
            self.workers.push(handle);
        }
        info!(threads = self.workers.len(), "normalizer pool started");
    }

    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        info!("normalizer pool stopped");
    }

    pub fn stats(&self) -> NormalizerStats {
        NormalizerStats {
            events_processed: self.counters.events_processed.load(Ordering::Relaxed),
            frames_output: self.counters.frames_output.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }
}

impl Drop for NormalizerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(
    rx: Receiver<RawEvent>,
    tx: Sender<Frame>,
    registry: Arc<SymbolRegistry>,
    sink: Arc<MetricsSink>,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
) {
    let mut batch = Vec::with_capacity(BATCH_SIZE);

    while running.load(Ordering::Relaxed) {
        batch.clear();
        while batch.len() < BATCH_SIZE {
            match rx.try_recv() {
                Ok(event) => batch.push(event),
                Err(_) => break,
            }
        }

        if batch.is_empty() {
            std::thread::sleep(EMPTY_BACKOFF);
            continue;
        }

        let dequeued = batch.len() as u64;
        for event in batch.drain(..) {
            let timer = sink.latency_timer("normalize_event_ns");
            match normalize_event(&event, &registry) {
                Ok(frame) => {
                    drop(timer);
                    if tx.try_send(frame).is_err() {
                        sink.inc_counter("normalizer_frames_dropped_queue_full", 1);
                    } else {
                        counters.frames_output.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Err(err) => {
                    timer.cancel();
                    warn!(symbol = %event.symbol, error = %err, "failed to normalize event");
                    counters.errors.fetch_add(1, Ordering::Relaxed);
                    sink.inc_counter("normalizer_errors_total", 1);
                }
            }
            counters.events_processed.fetch_add(1, Ordering::Relaxed);
        }
        sink.inc_counter("normalizer_events_total", dequeued);
    }
}

/// Convert a floating price to signed 1e8 fixed-point, ties to even.
fn scale_price(value: f64, field: &'static str) -> Result<i64> {
    if !value.is_finite() {
        return Err(Error::NonFinite { field, value });
    }
    let scaled = (value * FIXED_POINT_SCALE as f64).round_ties_even();
    if scaled < i64::MIN as f64 || scaled > i64::MAX as f64 {
        return Err(Error::PriceOverflow(value));
    }
    Ok(scaled as i64)
}

/// Convert a floating size to unsigned 1e8 fixed-point, ties to even.
fn scale_size(value: f64, field: &'static str) -> Result<u64> {
    if !value.is_finite() {
        return Err(Error::NonFinite { field, value });
    }
    if value < 0.0 {
        return Err(Error::NegativeSize(value));
    }
    let scaled = (value * FIXED_POINT_SCALE as f64).round_ties_even();
    if scaled > u64::MAX as f64 {
        return Err(Error::SizeOverflow(value));
    }
    Ok(scaled as u64)
}

/// Convert one raw event into its wire frame, resolving the symbol id.
pub fn normalize_event(event: &RawEvent, registry: &SymbolRegistry) -> Result<Frame> {
    let symbol_id = registry.get_or_add(&event.symbol);

    match &event.kind {
        EventKind::L1 {
            bid_price,
            bid_size,
            ask_price,
            ask_size,
        } => Ok(Frame::L1(L1Body {
            ts_ns: event.ts_ns,
            symbol_id,
            bid_px: scale_price(*bid_price, "bid_price")?,
            bid_sz: scale_size(*bid_size, "bid_size")?,
            ask_px: scale_price(*ask_price, "ask_price")?,
            ask_sz: scale_size(*ask_size, "ask_size")?,
            seq: event.seq,
        })),
        EventKind::L2 {
            side,
            action,
            level,
            price,
            size,
        } => Ok(Frame::L2(L2Body {
            ts_ns: event.ts_ns,
            symbol_id,
            side: *side as u8,
            action: *action as u8,
            level: *level,
            price: scale_price(*price, "price")?,
            size: scale_size(*size, "size")?,
            seq: event.seq,
        })),
        EventKind::Trade {
            price,
            size,
            aggressor,
        } => Ok(Frame::Trade(TradeBody {
            ts_ns: event.ts_ns,
            symbol_id,
            price: scale_price(*price, "price")?,
            size: scale_size(*size, "size")?,
            aggressor_side: *aggressor as u8,
            seq: event.seq,
        })),
    }
}
