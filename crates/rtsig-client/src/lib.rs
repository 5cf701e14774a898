//! rtsig Client Library
//!
//! Signaling state machine for real-time media sessions: it drives a
//! WebSocket (and later a data channel) through the connect handshake,
//! offer/answer and ICE exchange, renegotiation, keepalive and a bounded
//! shutdown, while a media engine does the actual work behind the
//! [`PeerConnection`] facade.
//!
//! # Example
//!
//! ```ignore
//! use rtsig_client::{Signaling, SignalingObserver};
//! use rtsig_core::{ErrorCode, Role};
//!
//! struct Printer;
//!
//! impl SignalingObserver for Printer {
//!     fn on_disconnect(&mut self, code: ErrorCode, reason: &str) {
//!         println!("disconnected: {} {}", code, reason);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let signaling = Signaling::builder("wss://sora.example.com/signaling")
//!         .channel_id("room")
//!         .role(Role::Recvonly)
//!         .factory(my_factory())
//!         .connect()?;
//!
//!     signaling.dispatch_events(&mut Printer);
//!     signaling.close().await;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod config;
pub mod error;
pub mod events;
pub mod peer;
pub mod signaling;

#[cfg(feature = "webrtc")]
pub mod webrtc;

pub use builder::SignalingBuilder;
pub use config::{MediaConfig, SignalingConfig};
pub use error::{ClientError, PeerError, Result};
pub use events::{EventQueue, SessionEvent, SignalingObserver};
pub use peer::{
    IceConnectionState, PeerConnection, PeerConnectionFactory, PeerConnectionState, PeerEvent,
    PeerEventSink, PeerResult,
};
pub use signaling::{SessionInfo, SessionState, Signaling};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::builder::SignalingBuilder;
    pub use crate::error::{ClientError, Result};
    pub use crate::events::{SessionEvent, SignalingObserver};
    pub use crate::signaling::{SessionState, Signaling};
    pub use rtsig_core::{ErrorCode, Role};
}
