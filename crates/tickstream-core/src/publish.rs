//! Publish Capability
//!
//! Frame producers (the distribution stage, the replayer) talk to the
//! pub-sub server through this one-way capability: they can publish frames
//! and manage virtual topic prefixes, nothing else. The publisher never holds
//! a reference back, so there is no ownership cycle between the replayer and
//! the server.

use crate::frame::Frame;

pub trait FramePublisher: Send + Sync {
    /// Route `frame` to every subscriber whose subscription matches `topic`.
    /// Never blocks the caller; overflow is the publisher's concern.
    fn publish(&self, topic: &str, frame: &Frame);

    /// Allow the topic matcher to recognize topics under `prefix`
    /// (e.g. `replay.<session_id>`).
    fn add_virtual_topic_prefix(&self, prefix: &str);

    /// Remove a previously registered prefix. Unknown prefixes are ignored.
    fn remove_virtual_topic_prefix(&self, prefix: &str);
}
