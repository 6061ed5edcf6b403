//! Distribution Stage
//!
//! Single thread between the normalizer egress and the two consumers: for
//! each frame it derives the routing topic from the body, hands the frame to
//! the publisher, and forwards a copy to the recorder's queue. Neither
//! downstream blocks this thread: the publisher drops per its own policy and
//! a full recorder queue drops here with a counter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use tickstream_core::frame::Frame;
use tickstream_core::{frame_topic, FramePublisher, SymbolRegistry};
use tickstream_observability::MetricsSink;
use tracing::info;

const BATCH_SIZE: usize = 100;
const EMPTY_BACKOFF: Duration = Duration::from_micros(100);

pub struct DistributionStage {
    rx: Receiver<Frame>,
    recorder_tx: Sender<Frame>,
    publisher: Arc<dyn FramePublisher>,
    registry: Arc<SymbolRegistry>,
    sink: Arc<MetricsSink>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DistributionStage {
    pub fn new(
        rx: Receiver<Frame>,
        recorder_tx: Sender<Frame>,
        publisher: Arc<dyn FramePublisher>,
        registry: Arc<SymbolRegistry>,
        sink: Arc<MetricsSink>,
    ) -> Self {
        Self {
            rx,
            recorder_tx,
            publisher,
            registry,
            sink,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let rx = self.rx.clone();
        let recorder_tx = self.recorder_tx.clone();
        let publisher = self.publisher.clone();
        let registry = self.registry.clone();
        let sink = self.sink.clone();
        let running = self.running.clone();

        self.handle = Some(
            std::thread::Builder::new()
                .name("distribution".into())
                .spawn(move || {
                    run_loop(rx, recorder_tx, publisher, registry, sink, running)
                })
                .expect("spawn distribution thread"),
        );
        info!("distribution stage started");
    }

    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        info!("distribution stage stopped");
    }
}

impl Drop for DistributionStage {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(
    rx: Receiver<Frame>,
    recorder_tx: Sender<Frame>,
    publisher: Arc<dyn FramePublisher>,
    registry: Arc<SymbolRegistry>,
    sink: Arc<MetricsSink>,
    running: Arc<AtomicBool>,
) {
    let mut batch = Vec::with_capacity(BATCH_SIZE);

    while running.load(Ordering::Relaxed) {
        batch.clear();
        while batch.len() < BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        if batch.is_empty() {
            std::thread::sleep(EMPTY_BACKOFF);
            continue;
        }

        let dequeued = batch.len() as u64;
        for frame in batch.drain(..) {
            if let Some(topic) = frame_topic(&frame, &registry) {
                publisher.publish(&topic, &frame);
            }
            if recorder_tx.try_send(frame).is_err() {
                sink.inc_counter("distribution_recorder_dropped_queue_full", 1);
            }
        }
        sink.inc_counter("frame_distribution_total", dequeued);
    }
}
