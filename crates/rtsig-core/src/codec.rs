//! JSON codec for signaling messages
//!
//! Outbound messages are serialized from [`ClientMessage`]; inbound text is
//! decoded into [`ServerMessage`]. Unknown `type` values decode to
//! [`ServerMessage::Unknown`] and unknown fields are ignored, but a missing
//! required field is a decode error.

use serde::Deserialize;
use serde_json::Value;

use crate::types::*;
use crate::{Error, Result};

/// Encode an outbound message to a JSON text frame
pub fn encode(message: &ClientMessage) -> Result<String> {
    serde_json::to_string(message).map_err(|e| Error::EncodeError(e.to_string()))
}

/// Decode an inbound JSON text frame
pub fn decode(text: &str) -> Result<ServerMessage> {
    serde_json::from_str(text).map_err(|e| Error::DecodeError(e.to_string()))
}

/// Decode a message sent by a client (used by peers and test servers)
pub fn decode_client(text: &str) -> Result<ClientMessage> {
    serde_json::from_str(text).map_err(|e| Error::DecodeError(e.to_string()))
}

/// Read the `type` field of a message without decoding the rest
pub fn message_type(text: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct Peek {
        #[serde(rename = "type")]
        kind: String,
    }

    serde_json::from_str::<Peek>(text).ok().map(|p| p.kind)
}

/// Build a pong, embedding a stats report when one was gathered
pub fn pong(stats: Option<Value>) -> ClientMessage {
    ClientMessage::Pong(PongMessage { stats })
}

/// Build the answer type matching an inbound renegotiation type
///
/// `update` is answered with `update`, `re-offer` with `re-answer`.
pub fn renegotiation_answer(request: &ServerMessage, sdp: String) -> Option<ClientMessage> {
    match request {
        ServerMessage::Update(_) => Some(ClientMessage::Update(SdpMessage::new(sdp))),
        ServerMessage::ReOffer(_) => Some(ClientMessage::ReAnswer(SdpMessage::new(sdp))),
        _ => None,
    }
}
