//! Topic Derivation
//!
//! Topic names route frames to subscribers: `"<type>.<symbol>"` where the
//! type tag is `l1`, `l2` or `trade`, and the symbol is resolved from the
//! frame's `symbol_id` through the registry (`UNKNOWN` when the id is not
//! registered). Heartbeats use the reserved bare topic `heartbeat`. The same
//! rule is applied by the live distribution stage and by replay sessions, so
//! a recorded stream and its replay derive identical base topics.

use crate::frame::Frame;
use crate::symbol::SymbolRegistry;

/// Fallback symbol name for unregistered ids.
pub const UNKNOWN_SYMBOL: &str = "UNKNOWN";

/// Reserved topic for publisher heartbeats.
pub const HEARTBEAT_TOPIC: &str = "heartbeat";

/// Derive the routing topic for a frame. `None` for control acks, which are
/// delivered point-to-point and never routed by topic.
pub fn frame_topic(frame: &Frame, registry: &SymbolRegistry) -> Option<String> {
    let tag = frame.type_tag()?;
    match frame.symbol_id() {
        Some(id) => {
            let symbol = registry.by_id(id);
            if symbol.is_empty() {
                Some(format!("{}.{}", tag, UNKNOWN_SYMBOL))
            } else {
                Some(format!("{}.{}", tag, symbol))
            }
        }
        None => Some(tag.to_string()),
    }
}
