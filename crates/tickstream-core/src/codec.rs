//! Framing Codec
//!
//! Serializes frames to the little-endian wire layout and back. The CRC32
//! (the reflected 0xEDB88320 polynomial with 0xFFFFFFFF init and final XOR,
//! i.e. what `crc32fast::hash` computes) is taken over the body bytes only
//! and stored in the header.
//!
//! `decode(encode(f)) == f` bit-identically for every well-formed frame;
//! decode rejects each malformation with a distinct [`Error`] variant so the
//! callers can count them separately.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::frame::{
    ControlAckBody, Frame, HeartbeatBody, L1Body, L2Body, MsgType, TradeBody, FRAME_HEADER_LEN,
    FRAME_MAGIC, FRAME_VERSION,
};

/// Encode a frame into a freshly allocated buffer.
pub fn encode(frame: &Frame) -> Bytes {
    let body_len = frame.body_len();
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + body_len);

    buf.put_u32_le(FRAME_MAGIC);
    buf.put_u16_le(FRAME_VERSION);
    buf.put_u16_le(frame.msg_type() as u16);
    buf.put_u32_le(body_len as u32);
    buf.put_u32_le(0); // CRC placeholder, patched below

    encode_body(frame, &mut buf);

    let crc = crc32fast::hash(&buf[FRAME_HEADER_LEN..]);
    buf[12..16].copy_from_slice(&crc.to_le_bytes());

    buf.freeze()
}

fn encode_body(frame: &Frame, buf: &mut BytesMut) {
    match frame {
        Frame::L1(b) => {
            buf.put_u64_le(b.ts_ns);
            buf.put_u32_le(b.symbol_id);
            buf.put_u32_le(0); // reserved, keeps fixed-point fields aligned
            buf.put_i64_le(b.bid_px);
            buf.put_u64_le(b.bid_sz);
            buf.put_i64_le(b.ask_px);
            buf.put_u64_le(b.ask_sz);
            buf.put_u64_le(b.seq);
        }
        Frame::L2(b) => {
            buf.put_u64_le(b.ts_ns);
            buf.put_u32_le(b.symbol_id);
            buf.put_u8(b.side);
            buf.put_u8(b.action);
            buf.put_u16_le(b.level);
            buf.put_i64_le(b.price);
            buf.put_u64_le(b.size);
            buf.put_u64_le(b.seq);
        }
        Frame::Trade(b) => {
            buf.put_u64_le(b.ts_ns);
            buf.put_u32_le(b.symbol_id);
            buf.put_i64_le(b.price);
            buf.put_u64_le(b.size);
            buf.put_u8(b.aggressor_side);
            buf.put_u64_le(b.seq);
        }
        Frame::Heartbeat(b) => {
            buf.put_u64_le(b.ts_ns);
        }
        Frame::ControlAck(b) => {
            buf.put_u32_le(b.ack_code);
            buf.put_u32_le(b.reserved);
        }
    }
}

/// Decode a single frame from the front of `data`.
///
/// Trailing bytes beyond the frame are ignored; callers that stream frames
/// use [`Frame::encoded_len`] on the result to advance.
pub fn decode(data: &[u8]) -> Result<Frame> {
    if data.len() < FRAME_HEADER_LEN {
        return Err(Error::Truncated {
            need: FRAME_HEADER_LEN,
            got: data.len(),
        });
    }

    let mut header = &data[..FRAME_HEADER_LEN];
    let magic = header.get_u32_le();
    let version = header.get_u16_le();
    let raw_msg_type = header.get_u16_le();
    let body_len = header.get_u32_le();
    let stored_crc = header.get_u32_le();

    if magic != FRAME_MAGIC {
        return Err(Error::BadMagic(magic));
    }
    if version != FRAME_VERSION {
        return Err(Error::UnsupportedVersion(version));
    }
    let msg_type =
        MsgType::from_u16(raw_msg_type).ok_or(Error::UnknownMsgType(raw_msg_type))?;
    if body_len as usize != msg_type.body_len() {
        return Err(Error::BodyLenMismatch {
            msg_type: raw_msg_type,
            body_len,
        });
    }

    let total = FRAME_HEADER_LEN + body_len as usize;
    if data.len() < total {
        return Err(Error::Truncated {
            need: total,
            got: data.len(),
        });
    }

    let body = &data[FRAME_HEADER_LEN..total];
    let computed = crc32fast::hash(body);
    if computed != stored_crc {
        return Err(Error::Crc {
            stored: stored_crc,
            computed,
        });
    }

    Ok(decode_body(msg_type, body))
}

fn decode_body(msg_type: MsgType, mut body: &[u8]) -> Frame {
    match msg_type {
        MsgType::L1 => {
            let ts_ns = body.get_u64_le();
            let symbol_id = body.get_u32_le();
            let _reserved = body.get_u32_le();
            Frame::L1(L1Body {
                ts_ns,
                symbol_id,
                bid_px: body.get_i64_le(),
                bid_sz: body.get_u64_le(),
                ask_px: body.get_i64_le(),
                ask_sz: body.get_u64_le(),
                seq: body.get_u64_le(),
            })
        }
        MsgType::L2 => Frame::L2(L2Body {
            ts_ns: body.get_u64_le(),
            symbol_id: body.get_u32_le(),
            side: body.get_u8(),
            action: body.get_u8(),
            level: body.get_u16_le(),
            price: body.get_i64_le(),
            size: body.get_u64_le(),
            seq: body.get_u64_le(),
        }),
        MsgType::Trade => Frame::Trade(TradeBody {
            ts_ns: body.get_u64_le(),
            symbol_id: body.get_u32_le(),
            price: body.get_i64_le(),
            size: body.get_u64_le(),
            aggressor_side: body.get_u8(),
            seq: body.get_u64_le(),
        }),
        MsgType::Heartbeat => Frame::Heartbeat(HeartbeatBody {
            ts_ns: body.get_u64_le(),
        }),
        MsgType::ControlAck => Frame::ControlAck(ControlAckBody {
            ack_code: body.get_u32_le(),
            reserved: body.get_u32_le(),
        }),
    }
}
