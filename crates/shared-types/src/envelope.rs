//! # Network Message Envelope
//!
//! Every gossiped message travels inside one envelope:
//! `type(1) ‖ sender_id(32) ‖ timestamp(8, LE) ‖ payload`.
//!
//! The payload is the canonical encoding of the typed message; the envelope
//! itself carries no authentication: consensus payloads are BLS-signed and
//! transactions are Ed25519-signed, so a forged envelope fails one layer up.

use crate::codec::{CodecError, Decodable, Decoder, Encodable, Encoder};
use serde::{Deserialize, Serialize};

/// Wire message types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    Hello = 0x01,
    HelloAck = 0x02,
    Ping = 0x03,
    Pong = 0x04,
    TxAnnounce = 0x10,
    TxRequest = 0x11,
    TxPayload = 0x12,
    BlockAnnounce = 0x20,
    BlockRequest = 0x21,
    BlockPayload = 0x22,
    ConsensusProposal = 0x30,
    ConsensusVote = 0x31,
    ConsensusViewChange = 0x32,
    IHave = 0x40,
    IWant = 0x41,
    Graft = 0x42,
    Prune = 0x43,
    FindNode = 0x50,
    FindNodeResponse = 0x51,
}

impl MessageType {
    pub fn from_u8(tag: u8) -> Result<Self, CodecError> {
        Ok(match tag {
            0x01 => Self::Hello,
            0x02 => Self::HelloAck,
            0x03 => Self::Ping,
            0x04 => Self::Pong,
            0x10 => Self::TxAnnounce,
            0x11 => Self::TxRequest,
            0x12 => Self::TxPayload,
            0x20 => Self::BlockAnnounce,
            0x21 => Self::BlockRequest,
            0x22 => Self::BlockPayload,
            0x30 => Self::ConsensusProposal,
            0x31 => Self::ConsensusVote,
            0x32 => Self::ConsensusViewChange,
            0x40 => Self::IHave,
            0x41 => Self::IWant,
            0x42 => Self::Graft,
            0x43 => Self::Prune,
            0x50 => Self::FindNode,
            0x51 => Self::FindNodeResponse,
            tag => {
                return Err(CodecError::InvalidTag {
                    tag,
                    context: "MessageType",
                })
            }
        })
    }
}

/// One framed wire message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub msg_type: MessageType,
    /// Stable peer identifier (hash of the peer's network key).
    pub sender_id: [u8; 32],
    /// Sender clock, milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(msg_type: MessageType, sender_id: [u8; 32], timestamp_ms: i64, payload: Vec<u8>) -> Self {
        Self {
            msg_type,
            sender_id,
            timestamp_ms,
            payload,
        }
    }
}

impl Encodable for Envelope {
    fn encode_into(&self, enc: &mut Encoder) {
        enc.put_u8(self.msg_type as u8);
        enc.put_fixed(&self.sender_id);
        enc.put_i64(self.timestamp_ms);
        enc.put_fixed(&self.payload);
    }
}

impl Decodable for Envelope {
    fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        let msg_type = MessageType::from_u8(dec.get_u8()?)?;
        let sender_id = dec.get_fixed::<32>()?;
        let timestamp_ms = dec.get_i64()?;
        // The payload runs to the end of the frame; transport framing owns
        // the outer length.
        let mut payload = Vec::with_capacity(dec.remaining());
        while dec.remaining() > 0 {
            payload.push(dec.get_u8()?);
        }
        Ok(Self {
            msg_type,
            sender_id,
            timestamp_ms,
            payload,
        })
    }
}
