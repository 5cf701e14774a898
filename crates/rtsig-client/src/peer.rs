//! Peer connection facade
//!
//! The signaling state machine never talks to a media engine directly. It
//! drives one through [`PeerConnectionFactory`] and [`PeerConnection`], and
//! the engine reports back by posting [`PeerEvent`]s into a
//! [`PeerEventSink`]. Posting is the only way engine callbacks reach the
//! session; nothing the engine runs touches session state.

use async_trait::async_trait;
use rtsig_core::{RtcConfiguration, RtpEncodingParameters};
use rtsig_transport::{DataChannel, DataChannelEvent};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::PeerError;

pub type PeerResult<T> = std::result::Result<T, PeerError>;

/// ICE connection state as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IceConnectionState {
    #[default]
    New,
    Checking,
    Connected,
    Completed,
    Failed,
    Disconnected,
    Closed,
}

impl IceConnectionState {
    /// Connected or completed
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            IceConnectionState::Connected | IceConnectionState::Completed
        )
    }
}

/// Aggregate peer connection state as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerConnectionState {
    #[default]
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Something the engine observed
pub enum PeerEvent {
    IceConnectionState(IceConnectionState),
    PeerConnectionState(PeerConnectionState),
    /// A locally gathered candidate, to be trickled to the remote
    IceCandidate { mid: String, index: u16, sdp: String },
    TrackAdded {
        track_id: String,
        stream_ids: Vec<String>,
    },
    TrackRemoved { track_id: String },
    /// The remote opened a data channel
    DataChannel(Arc<dyn DataChannel>),
    DataChannelEvent(DataChannelEvent),
}

impl fmt::Debug for PeerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerEvent::IceConnectionState(s) => f.debug_tuple("IceConnectionState").field(s).finish(),
            PeerEvent::PeerConnectionState(s) => {
                f.debug_tuple("PeerConnectionState").field(s).finish()
            }
            PeerEvent::IceCandidate { mid, index, .. } => f
                .debug_struct("IceCandidate")
                .field("mid", mid)
                .field("index", index)
                .finish_non_exhaustive(),
            PeerEvent::TrackAdded {
                track_id,
                stream_ids,
            } => f
                .debug_struct("TrackAdded")
                .field("track_id", track_id)
                .field("stream_ids", stream_ids)
                .finish(),
            PeerEvent::TrackRemoved { track_id } => f
                .debug_struct("TrackRemoved")
                .field("track_id", track_id)
                .finish(),
            PeerEvent::DataChannel(channel) => {
                f.debug_tuple("DataChannel").field(&channel.label()).finish()
            }
            PeerEvent::DataChannelEvent(event) => {
                f.debug_tuple("DataChannelEvent").field(event).finish()
            }
        }
    }
}

/// Hands engine callbacks over to the session task
///
/// Once the session starts tearing down, the liveness flag is cleared and
/// every later `post` is dropped.
#[derive(Clone)]
pub struct PeerEventSink {
    tx: mpsc::UnboundedSender<PeerEvent>,
    alive: Arc<AtomicBool>,
}

impl PeerEventSink {
    pub fn new(tx: mpsc::UnboundedSender<PeerEvent>, alive: Arc<AtomicBool>) -> Self {
        Self { tx, alive }
    }

    /// A sink with its own receiving end, for driving a facade in isolation
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PeerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx, Arc::new(AtomicBool::new(true))), rx)
    }

    /// Post an event; returns false if the session is gone or tearing down
    pub fn post(&self, event: PeerEvent) -> bool {
        if !self.alive.load(Ordering::SeqCst) {
            trace!("Dropping {:?} after teardown", event);
            return false;
        }
        self.tx.send(event).is_ok()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.tx.is_closed()
    }
}

/// Creates one peer connection per session
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    /// Create a connection for the ICE configuration carried by the offer
    ///
    /// Every engine callback of the new connection must go through `events`.
    async fn create_connection(
        &self,
        config: RtcConfiguration,
        events: PeerEventSink,
    ) -> PeerResult<Arc<dyn PeerConnection>>;
}

/// Operations the signaling state machine performs on a peer connection
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Apply a remote offer
    async fn set_offer(&self, sdp: &str) -> PeerResult<()>;

    /// Create an answer, apply it as the local description and return its SDP
    async fn create_answer(&self) -> PeerResult<String>;

    async fn add_ice_candidate(&self, mid: &str, index: u16, sdp: &str) -> PeerResult<()>;

    /// Current statistics report as JSON
    async fn get_stats(&self) -> PeerResult<Value>;

    /// Attach the locally configured tracks
    async fn init_tracks(&self) -> PeerResult<()>;

    async fn set_encoding_parameters(&self, encodings: Vec<RtpEncodingParameters>)
        -> PeerResult<()>;

    async fn reset_encoding_parameters(&self) -> PeerResult<()>;

    /// Release the connection; the engine may still fire callbacks while this runs
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_stops_after_liveness_cleared() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let alive = Arc::new(AtomicBool::new(true));
        let sink = PeerEventSink::new(tx, alive.clone());

        assert!(sink.post(PeerEvent::IceConnectionState(
            IceConnectionState::Checking
        )));
        alive.store(false, Ordering::SeqCst);
        assert!(!sink.post(PeerEvent::IceConnectionState(
            IceConnectionState::Closed
        )));
        assert!(!sink.is_alive());

        assert!(matches!(
            rx.try_recv(),
            Ok(PeerEvent::IceConnectionState(IceConnectionState::Checking))
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_ice_connected_states() {
        assert!(IceConnectionState::Connected.is_connected());
        assert!(IceConnectionState::Completed.is_connected());
        assert!(!IceConnectionState::Checking.is_connected());
        assert!(!IceConnectionState::Disconnected.is_connected());
    }
}
