//! QMI wire format
//!
//! Message framing used by the sensor firmware service:
//!
//! ```text
//! [type:u8] [txn_id:u16 LE] [msg_id:u16 LE] [msg_len:u16 LE] [TLVs...]
//! ```
//!
//! `type` is 0 for requests, 2 for responses, 4 for server-initiated
//! indications. Responses echo the transaction id of their request;
//! indications carry txn id 0.

pub mod codec;
pub mod element;

use crate::error::{Error, Result};

/// Message type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Request,
    Response,
    Indication,
}

impl MessageType {
    fn from_wire(b: u8) -> Result<Self> {
        match b {
            0 => Ok(MessageType::Request),
            2 => Ok(MessageType::Response),
            4 => Ok(MessageType::Indication),
            other => Err(Error::BadPayload(format!(
                "unknown message type {:#04x}",
                other
            ))),
        }
    }

    fn to_wire(self) -> u8 {
        match self {
            MessageType::Request => 0,
            MessageType::Response => 2,
            MessageType::Indication => 4,
        }
    }
}

/// Decoded message header
#[derive(Debug, Clone, Copy)]
pub struct MsgHeader {
    pub msg_type: MessageType,
    pub txn_id: u16,
    pub msg_id: u16,
}

/// QMI header size in bytes
pub const HEADER_LEN: usize = 7;

/// Standard result TLV type present in every response
pub const TLV_RESULT: u8 = 0x02;

/// Frame a message: header plus already-encoded TLV payload
pub fn encode_message(
    msg_type: MessageType,
    txn_id: u16,
    msg_id: u16,
    payload: &[u8],
) -> Result<Vec<u8>> {
    if payload.len() > u16::MAX as usize {
        return Err(Error::Schema("message payload exceeds 64 KiB"));
    }
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.push(msg_type.to_wire());
    out.extend_from_slice(&txn_id.to_le_bytes());
    out.extend_from_slice(&msg_id.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Split a frame into header and TLV payload
pub fn decode_message(frame: &[u8]) -> Result<(MsgHeader, &[u8])> {
    if frame.len() < HEADER_LEN {
        return Err(Error::BadPayload(format!(
            "frame too short: {} bytes",
            frame.len()
        )));
    }
    let header = MsgHeader {
        msg_type: MessageType::from_wire(frame[0])?,
        txn_id: u16::from_le_bytes([frame[1], frame[2]]),
        msg_id: u16::from_le_bytes([frame[3], frame[4]]),
    };
    let len = u16::from_le_bytes([frame[5], frame[6]]) as usize;
    if frame.len() < HEADER_LEN + len {
        return Err(Error::BadPayload(format!(
            "declared payload {} bytes, {} present",
            len,
            frame.len() - HEADER_LEN
        )));
    }
    Ok((header, &frame[HEADER_LEN..HEADER_LEN + len]))
}

/// Check the standard result TLV value `{ result:u16, error:u16 }`
pub fn check_result(value: &element::Value) -> Result<()> {
    let fields = value.as_struct()?;
    if fields.len() != 2 {
        return Err(Error::Schema("result TLV shape"));
    }
    let result = fields[0].as_u16()?;
    let error = fields[1].as_u16()?;
    if result != 0 {
        return Err(Error::Remote { result, error });
    }
    Ok(())
}
