//! Signaling message definitions
//!
//! Every message is a JSON object carried in one text frame (or one
//! data-channel payload) and discriminated by its `type` field.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Media direction of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Sendonly,
    Recvonly,
    Sendrecv,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Sendonly => "sendonly",
            Role::Recvonly => "recvonly",
            Role::Sendrecv => "sendrecv",
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sendonly" => Ok(Role::Sendonly),
            "recvonly" => Ok(Role::Recvonly),
            "sendrecv" => Ok(Role::Sendrecv),
            other => Err(Error::InvalidParameter(format!("unknown role: {}", other))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a declared data channel
pub type Direction = Role;

// ============================================================================
// Connect
// ============================================================================

/// `video` / `audio` entry of the connect message: `false` or a spec object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MediaOption {
    Enabled(MediaSpec),
    Flag(bool),
}

impl Default for MediaOption {
    fn default() -> Self {
        MediaOption::Flag(true)
    }
}

/// Codec and bitrate preferences for one media kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bit_rate: Option<u32>,
}

/// Data channel declaration sent with the connect message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataChannelDecl {
    pub label: String,
    pub direction: Direction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordered: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_packet_life_time: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retransmits: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compress: Option<bool>,
}

impl DataChannelDecl {
    pub fn new(label: &str, direction: Direction) -> Self {
        Self {
            label: label.to_string(),
            direction,
            ordered: None,
            max_packet_life_time: None,
            max_retransmits: None,
            protocol: None,
            compress: None,
        }
    }
}

/// Initial handshake sent once the primary transport is up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectMessage {
    pub role: Role,
    pub channel_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signaling_notify_metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multistream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spotlight: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spotlight_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spotlight_focus_rid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spotlight_unfocus_rid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simulcast: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simulcast_rid: Option<String>,
    pub video: MediaOption,
    pub audio: MediaOption,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_channel_signaling: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_disconnect_websocket: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_channels: Vec<DataChannelDecl>,
    pub sora_client: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub libwebrtc: Option<String>,
    pub environment: String,
}

// ============================================================================
// Offer and peer-connection configuration
// ============================================================================

/// ICE server entry from the offer's `config.iceServers`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Peer-connection configuration embedded in the offer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RtcConfiguration {
    #[serde(rename = "iceServers", default)]
    pub ice_servers: Vec<IceServer>,
    #[serde(
        rename = "iceTransportPolicy",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub ice_transport_policy: Option<String>,
}

/// Per-stream simulcast encoding parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpEncodingParameters {
    pub rid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bitrate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_bitrate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_framerate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_resolution_down_by: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adaptive_ptime: Option<bool>,
}

/// Data channel entry of the offer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataChannelOffer {
    pub label: String,
    #[serde(default)]
    pub compress: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
}

/// `offer` from the remote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferMessage {
    pub sdp: String,
    pub config: RtcConfiguration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_channels: Vec<DataChannelOffer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encodings: Option<Vec<RtpEncodingParameters>>,
}

// ============================================================================
// Small payloads
// ============================================================================

/// A message carrying only an SDP body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdpMessage {
    pub sdp: String,
}

impl SdpMessage {
    pub fn new(sdp: impl Into<String>) -> Self {
        Self { sdp: sdp.into() }
    }
}

/// ICE candidate, trickled in either direction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateMessage {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
}

/// `notify` event, kept as a free-form object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

/// `push` payload, kept as a free-form object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

/// Keepalive probe from the remote
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PingMessage {
    #[serde(default)]
    pub stats: bool,
}

/// Keepalive reply, optionally carrying a stats report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PongMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<Value>,
}

/// Announces that the data channel carries signaling from now on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwitchedMessage {
    #[serde(default)]
    pub ignore_disconnect_websocket: bool,
}

/// Farewell sent during close
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisconnectMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Reply to a `req-stats` request on the stats label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsMessage {
    pub reports: Value,
}

// ============================================================================
// Message enums
// ============================================================================

/// Messages received from the signaling peer
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    Offer(OfferMessage),
    Update(SdpMessage),
    ReOffer(SdpMessage),
    Candidate(CandidateMessage),
    Notify(NotifyMessage),
    Push(PushMessage),
    Ping(PingMessage),
    Switched(SwitchedMessage),
    ReqStats,
    /// Any `type` this client does not understand
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    pub fn type_name(&self) -> &'static str {
        match self {
            ServerMessage::Offer(_) => "offer",
            ServerMessage::Update(_) => "update",
            ServerMessage::ReOffer(_) => "re-offer",
            ServerMessage::Candidate(_) => "candidate",
            ServerMessage::Notify(_) => "notify",
            ServerMessage::Push(_) => "push",
            ServerMessage::Ping(_) => "ping",
            ServerMessage::Switched(_) => "switched",
            ServerMessage::ReqStats => "req-stats",
            ServerMessage::Unknown => "unknown",
        }
    }
}

/// Messages sent to the signaling peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    Connect(ConnectMessage),
    Answer(SdpMessage),
    Update(SdpMessage),
    ReAnswer(SdpMessage),
    Candidate(CandidateMessage),
    Pong(PongMessage),
    Disconnect(DisconnectMessage),
    Stats(StatsMessage),
}

impl ClientMessage {
    pub fn type_name(&self) -> &'static str {
        match self {
            ClientMessage::Connect(_) => "connect",
            ClientMessage::Answer(_) => "answer",
            ClientMessage::Update(_) => "update",
            ClientMessage::ReAnswer(_) => "re-answer",
            ClientMessage::Candidate(_) => "candidate",
            ClientMessage::Pong(_) => "pong",
            ClientMessage::Disconnect(_) => "disconnect",
            ClientMessage::Stats(_) => "stats",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!("sendonly".parse::<Role>().unwrap(), Role::Sendonly);
        assert_eq!("recvonly".parse::<Role>().unwrap(), Role::Recvonly);
        assert_eq!("sendrecv".parse::<Role>().unwrap(), Role::Sendrecv);
        assert!("upstream".parse::<Role>().is_err());
        assert!("".parse::<Role>().is_err());
    }

    #[test]
    fn test_media_option_shapes() {
        let off = serde_json::to_value(MediaOption::Flag(false)).unwrap();
        assert_eq!(off, serde_json::json!(false));

        let on = serde_json::to_value(MediaOption::Enabled(MediaSpec {
            codec_type: Some("VP9".into()),
            bit_rate: None,
        }))
        .unwrap();
        assert_eq!(on, serde_json::json!({"codec_type": "VP9"}));
    }
}
