//! Core types shared by every tickstream component.
//!
//! This crate is dependency-light on purpose: it holds the wire frame model,
//! the framing codec with its CRC32 integrity check, the process-wide symbol
//! registry, and the `FramePublisher` capability trait that decouples frame
//! producers from the pub-sub server.

pub mod codec;
pub mod error;
pub mod frame;
pub mod publish;
pub mod symbol;
pub mod topic;

pub use codec::{decode, encode};
pub use error::{Error, Result};
pub use frame::{
    AggressorSide, BookAction, ControlAckBody, Frame, HeartbeatBody, L1Body, L2Body, MsgType,
    Side, TradeBody,
};
pub use publish::FramePublisher;
pub use symbol::SymbolRegistry;
pub use topic::frame_topic;
