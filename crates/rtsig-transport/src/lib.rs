//! rtsig Transport Layer
//!
//! This crate provides the carriers signaling messages travel over:
//! - WebSocket (primary, text frames, optionally TLS)
//! - WebRTC data channels (secondary, after switch-over)
//! - A resettable single-shot [`Watchdog`] used for liveness timeouts

pub mod data_channel;
pub mod error;
pub mod traits;
pub mod watchdog;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(feature = "webrtc")]
pub mod webrtc;

pub use data_channel::{DataChannel, DataChannelEvent, DataChannelSet};
pub use error::{Result, TransportError};
pub use traits::{
    CloseOutcome, Transport, TransportEvent, TransportReceiver, TransportSender, TransportServer,
};
pub use watchdog::Watchdog;

#[cfg(feature = "websocket")]
pub use websocket::{validate_url, WebSocketConfig, WebSocketServer, WebSocketTransport};

#[cfg(feature = "webrtc")]
pub use self::webrtc::RtcDataChannel;
