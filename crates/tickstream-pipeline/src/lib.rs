//! The in-process data plane: raw event ingestion, the normalizer pool that
//! turns raw events into wire frames, and the distribution stage that fans
//! normalized frames out to the publisher and the recorder.
//!
//! All cross-thread hand-offs use bounded `crossbeam-channel` queues; a full
//! queue drops and counts, it never blocks the producer.

pub mod distribution;
pub mod error;
pub mod feed;
pub mod normalizer;

pub use distribution::DistributionStage;
pub use error::{Error, Result};
pub use feed::{EventKind, FeedStats, MockFeed, RawEvent};
pub use normalizer::{normalize_event, NormalizerPool, NormalizerStats};
