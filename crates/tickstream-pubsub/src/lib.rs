//! Topic-based TCP pub-sub.
//!
//! The [`PubServer`] accepts client sockets, runs a control-reader and a
//! writer task per client, and routes published frames to every authenticated
//! client whose subscription set matches the topic. Send queues are bounded;
//! overflow drops the frame and counts it, the producer never blocks.

pub mod client;
pub mod error;
pub mod server;
pub mod subscription;

pub use client::{ClientConnection, MAX_QUEUE_SIZE};
pub use error::{Error, Result};
pub use server::{PubServer, PubServerConfig, PubServerStats};
pub use subscription::TopicSubscription;
