//! Server-side wiring: configuration, the [`MarketDataCore`] that owns the
//! whole pipeline, and the in-process control API consumed by an external
//! control plane.

pub mod config;
pub mod core;

pub use config::Config;
pub use core::{HealthSnapshot, MarketDataCore};
