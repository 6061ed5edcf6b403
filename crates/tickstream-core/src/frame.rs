//! Wire Frame Model
//!
//! The frame is the atomic unit on every byte-touching path: the pub-sub
//! socket, the `.mdf` recording files, and replay. A frame is a fixed
//! 16-byte header followed by one of five tagged bodies; the discriminator is
//! the `msg_type` field in the header.
//!
//! ## Header layout (little-endian, 16 bytes)
//!
//! ```text
//! ┌─────────┬─────────┬──────────┬──────────┬─────────┐
//! │ magic   │ version │ msg_type │ body_len │ crc32   │
//! │ (4)     │ (2)     │ (2)      │ (4)      │ (4)     │
//! └─────────┴─────────┴──────────┴──────────┴─────────┘
//! ```
//!
//! `crc32` covers the body bytes only. Prices are signed 64-bit fixed-point
//! and sizes unsigned 64-bit fixed-point, both scaled by 1e8.

/// Frame magic: 'M','D','A','F' read as a little-endian u32.
pub const FRAME_MAGIC: u32 = 0x4D44_4146;

/// Current wire format version.
pub const FRAME_VERSION: u16 = 1;

/// Size of the fixed frame header in bytes.
pub const FRAME_HEADER_LEN: usize = 16;

/// Fixed-point scale applied to prices and sizes (1e8).
pub const FIXED_POINT_SCALE: i64 = 100_000_000;

pub const L1_BODY_LEN: usize = 56;
pub const L2_BODY_LEN: usize = 40;
pub const TRADE_BODY_LEN: usize = 37;
pub const HEARTBEAT_BODY_LEN: usize = 8;
pub const CONTROL_ACK_BODY_LEN: usize = 8;

/// Message type discriminator carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MsgType {
    L1 = 1,
    L2 = 2,
    Trade = 3,
    Heartbeat = 4,
    ControlAck = 5,
}

impl MsgType {
    pub fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            1 => Some(MsgType::L1),
            2 => Some(MsgType::L2),
            3 => Some(MsgType::Trade),
            4 => Some(MsgType::Heartbeat),
            5 => Some(MsgType::ControlAck),
            _ => None,
        }
    }

    /// Fixed body size for this message type.
    pub fn body_len(self) -> usize {
        match self {
            MsgType::L1 => L1_BODY_LEN,
            MsgType::L2 => L2_BODY_LEN,
            MsgType::Trade => TRADE_BODY_LEN,
            MsgType::Heartbeat => HEARTBEAT_BODY_LEN,
            MsgType::ControlAck => CONTROL_ACK_BODY_LEN,
        }
    }
}

/// Book side for L2 updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Side {
    Bid = 0,
    Ask = 1,
}

/// Action applied to an L2 book level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BookAction {
    Insert = 0,
    Update = 1,
    Delete = 2,
}

/// Trade aggressor side. `Unknown` is the wire value 255.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AggressorSide {
    Buy = 0,
    Sell = 1,
    Unknown = 255,
}

/// Top-of-book snapshot. 56 bytes on the wire: the four bytes after
/// `symbol_id` are reserved (written as zero, ignored on decode) so the
/// fixed-point fields stay 8-byte aligned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L1Body {
    pub ts_ns: u64,
    pub symbol_id: u32,
    pub bid_px: i64,
    pub bid_sz: u64,
    pub ask_px: i64,
    pub ask_sz: u64,
    pub seq: u64,
}

/// Single book-level change. The side and action fields carry the raw wire
/// bytes; use [`Side`] / [`BookAction`] when constructing them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L2Body {
    pub ts_ns: u64,
    pub symbol_id: u32,
    pub side: u8,
    pub action: u8,
    /// 0 = best level.
    pub level: u16,
    pub price: i64,
    /// Zero is valid for deletes.
    pub size: u64,
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradeBody {
    pub ts_ns: u64,
    pub symbol_id: u32,
    pub price: i64,
    pub size: u64,
    /// 0 = buy, 1 = sell, 255 = unknown.
    pub aggressor_side: u8,
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatBody {
    pub ts_ns: u64,
}

/// Response to a control operation on the pub-sub socket.
/// `ack_code` follows HTTP conventions (200, 400, 401).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlAckBody {
    pub ack_code: u32,
    pub reserved: u32,
}

impl ControlAckBody {
    pub fn new(ack_code: u32) -> Self {
        Self {
            ack_code,
            reserved: 0,
        }
    }
}

/// A complete frame: the body variant implies `msg_type` and `body_len`; the
/// header is materialized by the codec on encode and validated on decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    L1(L1Body),
    L2(L2Body),
    Trade(TradeBody),
    Heartbeat(HeartbeatBody),
    ControlAck(ControlAckBody),
}

impl Frame {
    pub fn msg_type(&self) -> MsgType {
        match self {
            Frame::L1(_) => MsgType::L1,
            Frame::L2(_) => MsgType::L2,
            Frame::Trade(_) => MsgType::Trade,
            Frame::Heartbeat(_) => MsgType::Heartbeat,
            Frame::ControlAck(_) => MsgType::ControlAck,
        }
    }

    pub fn body_len(&self) -> usize {
        self.msg_type().body_len()
    }

    /// Total encoded size, header included.
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_LEN + self.body_len()
    }

    /// Event timestamp. `None` for control acks, which carry no timestamp.
    pub fn ts_ns(&self) -> Option<u64> {
        match self {
            Frame::L1(b) => Some(b.ts_ns),
            Frame::L2(b) => Some(b.ts_ns),
            Frame::Trade(b) => Some(b.ts_ns),
            Frame::Heartbeat(b) => Some(b.ts_ns),
            Frame::ControlAck(_) => None,
        }
    }

    /// Symbol id for market-data frames; `None` for heartbeats and acks.
    pub fn symbol_id(&self) -> Option<u32> {
        match self {
            Frame::L1(b) => Some(b.symbol_id),
            Frame::L2(b) => Some(b.symbol_id),
            Frame::Trade(b) => Some(b.symbol_id),
            Frame::Heartbeat(_) | Frame::ControlAck(_) => None,
        }
    }

    /// Topic type tag for this frame ("l1", "l2", "trade", "heartbeat").
    /// `None` for control acks, which are never routed by topic.
    pub fn type_tag(&self) -> Option<&'static str> {
        match self {
            Frame::L1(_) => Some("l1"),
            Frame::L2(_) => Some("l2"),
            Frame::Trade(_) => Some("trade"),
            Frame::Heartbeat(_) => Some("heartbeat"),
            Frame::ControlAck(_) => None,
        }
    }
}
