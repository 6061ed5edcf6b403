//! Replay of recorded ranges through the live publisher.
//!
//! A [`Replayer`] manages up to ten concurrent [`ReplaySession`]s. Each
//! session owns a reader over one recorded `.mdf`/`.idx` pair and a token
//! bucket pacing playback at the recorded inter-arrival times scaled by the
//! session's rate multiplier. Replayed frames are published under
//! `replay.<session_id>.<base_topic>` so they never collide with the live
//! stream in a subscriber's namespace.

pub mod bucket;
pub mod error;
pub mod replayer;
pub mod session;

pub use bucket::TokenBucket;
pub use error::{Error, Result};
pub use replayer::{Replayer, ReplayerStats, MAX_CONCURRENT_SESSIONS, MAX_RATE_MULTIPLIER};
pub use session::{ReplaySession, SessionInfo};
