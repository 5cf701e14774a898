//! Peer connection facade backed by webrtc-rs
//!
//! Every `RTCPeerConnection` callback is turned into a [`PeerEvent`] and
//! posted through the session's [`PeerEventSink`]; nothing here touches
//! session state directly.

use async_trait::async_trait;
use parking_lot::Mutex;
use rtsig_core::{RtcConfiguration, RtpEncodingParameters};
use rtsig_transport::RtcDataChannel;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use webrtc_rs::{
    api::{
        interceptor_registry::register_default_interceptors, media_engine::MediaEngine, APIBuilder,
    },
    data_channel::RTCDataChannel,
    ice_transport::{
        ice_candidate::{RTCIceCandidate, RTCIceCandidateInit},
        ice_connection_state::RTCIceConnectionState,
        ice_server::RTCIceServer,
    },
    interceptor::registry::Registry,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        policy::ice_transport_policy::RTCIceTransportPolicy,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
    rtp::packet::Packet,
    rtp_transceiver::rtp_receiver::RTCRtpReceiver,
    rtp_transceiver::RTCRtpTransceiver,
    track::{track_local::TrackLocal, track_remote::TrackRemote},
};

use crate::error::PeerError;
use crate::peer::{
    IceConnectionState, PeerConnection, PeerConnectionFactory, PeerConnectionState, PeerEvent,
    PeerEventSink, PeerResult,
};

type LocalTrack = Arc<dyn TrackLocal + Send + Sync>;

/// Receives the RTP packets of remote tracks, keyed by track id
pub type RtpHandler = Arc<dyn Fn(&str, Packet) + Send + Sync>;

/// Creates webrtc-rs peer connections
///
/// Tracks given here are attached to every connection during
/// [`PeerConnection::init_tracks`]. Remote tracks are read here to detect
/// their end, so received media only reaches the application through
/// [`on_rtp`](Self::on_rtp).
#[derive(Default)]
pub struct RtcPeerConnectionFactory {
    tracks: Vec<LocalTrack>,
    on_rtp: Option<RtpHandler>,
}

impl RtcPeerConnectionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tracks(tracks: Vec<LocalTrack>) -> Self {
        Self {
            tracks,
            ..Default::default()
        }
    }

    /// Deliver remote media to `handler`; without one it is discarded
    pub fn on_rtp(mut self, handler: RtpHandler) -> Self {
        self.on_rtp = Some(handler);
        self
    }
}

fn ice_servers(config: &RtcConfiguration) -> Vec<RTCIceServer> {
    config
        .ice_servers
        .iter()
        .map(|server| RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

fn ice_state(state: RTCIceConnectionState) -> Option<IceConnectionState> {
    match state {
        RTCIceConnectionState::New => Some(IceConnectionState::New),
        RTCIceConnectionState::Checking => Some(IceConnectionState::Checking),
        RTCIceConnectionState::Connected => Some(IceConnectionState::Connected),
        RTCIceConnectionState::Completed => Some(IceConnectionState::Completed),
        RTCIceConnectionState::Failed => Some(IceConnectionState::Failed),
        RTCIceConnectionState::Disconnected => Some(IceConnectionState::Disconnected),
        RTCIceConnectionState::Closed => Some(IceConnectionState::Closed),
        _ => None,
    }
}

fn peer_state(state: RTCPeerConnectionState) -> Option<PeerConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(PeerConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(PeerConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(PeerConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(PeerConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(PeerConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(PeerConnectionState::Closed),
        _ => None,
    }
}

#[async_trait]
impl PeerConnectionFactory for RtcPeerConnectionFactory {
    async fn create_connection(
        &self,
        config: RtcConfiguration,
        events: PeerEventSink,
    ) -> PeerResult<Arc<dyn PeerConnection>> {
        let mut m = MediaEngine::default();
        m.register_default_codecs()
            .map_err(|e| PeerError::CreateFailed(format!("codec registration failed: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut m).map_err(|e| {
            PeerError::CreateFailed(format!("interceptor registration failed: {}", e))
        })?;

        let api = APIBuilder::new()
            .with_media_engine(m)
            .with_interceptor_registry(registry)
            .build();

        let mut rtc_config = RTCConfiguration {
            ice_servers: ice_servers(&config),
            ..Default::default()
        };
        if let Some(policy) = config.ice_transport_policy.as_deref() {
            rtc_config.ice_transport_policy = RTCIceTransportPolicy::from(policy);
        }

        let pc = api
            .new_peer_connection(rtc_config)
            .await
            .map_err(|e| PeerError::CreateFailed(e.to_string()))?;
        let pc = Arc::new(pc);

        install_callbacks(&pc, events, self.on_rtp.clone());
        info!("Peer connection created");

        Ok(Arc::new(RtcPeerConnection {
            pc,
            tracks: self.tracks.clone(),
            encodings: Mutex::new(Vec::new()),
        }))
    }
}

/// Read a remote track until it ends, handing each packet to `on_rtp`
///
/// Returns the number of packets read.
async fn pump_track<R, F>(track_id: &str, mut read: R, on_rtp: Option<&RtpHandler>) -> usize
where
    R: FnMut() -> F,
    F: Future<Output = Option<Packet>>,
{
    let mut packets = 0;
    while let Some(packet) = read().await {
        packets += 1;
        if let Some(handler) = on_rtp {
            handler(track_id, packet);
        }
    }
    packets
}

fn install_callbacks(
    pc: &Arc<RTCPeerConnection>,
    events: PeerEventSink,
    on_rtp: Option<RtpHandler>,
) {
    let sink = events.clone();
    pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
        if let Some(state) = ice_state(state) {
            sink.post(PeerEvent::IceConnectionState(state));
        }
        Box::pin(async {})
    }));

    let sink = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        if let Some(state) = peer_state(state) {
            sink.post(PeerEvent::PeerConnectionState(state));
        }
        Box::pin(async {})
    }));

    let sink = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        // None marks the end of gathering
        if let Some(candidate) = candidate {
            match candidate.to_json() {
                Ok(init) => {
                    sink.post(PeerEvent::IceCandidate {
                        mid: init.sdp_mid.unwrap_or_default(),
                        index: init.sdp_mline_index.unwrap_or(0),
                        sdp: init.candidate,
                    });
                }
                Err(e) => warn!("Failed to convert ICE candidate: {}", e),
            }
        }
        Box::pin(async {})
    }));

    let sink = events.clone();
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let track_id = track.id();
            sink.post(PeerEvent::TrackAdded {
                track_id: track_id.clone(),
                stream_ids: vec![track.stream_id()],
            });

            // The remote track ends when reading from it fails
            let sink = sink.clone();
            let on_rtp = on_rtp.clone();
            Box::pin(async move {
                tokio::spawn(async move {
                    let packets = pump_track(
                        &track_id,
                        || {
                            let track = track.clone();
                            async move { track.read_rtp().await.ok().map(|(packet, _)| packet) }
                        },
                        on_rtp.as_ref(),
                    )
                    .await;
                    debug!("Remote track {} ended after {} packets", track_id, packets);
                    sink.post(PeerEvent::TrackRemoved { track_id });
                });
            })
        },
    ));

    let sink = events;
    pc.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
        let forward = sink.clone();
        let channel = RtcDataChannel::attach(
            channel,
            Arc::new(move |event| {
                forward.post(PeerEvent::DataChannelEvent(event));
            }),
        );
        sink.post(PeerEvent::DataChannel(channel));
        Box::pin(async {})
    }));
}

/// A webrtc-rs peer connection
pub struct RtcPeerConnection {
    pc: Arc<RTCPeerConnection>,
    tracks: Vec<LocalTrack>,
    encodings: Mutex<Vec<RtpEncodingParameters>>,
}

impl RtcPeerConnection {
    /// Encodings most recently requested by the remote
    pub fn encodings(&self) -> Vec<RtpEncodingParameters> {
        self.encodings.lock().clone()
    }
}

#[async_trait]
impl PeerConnection for RtcPeerConnection {
    async fn set_offer(&self, sdp: &str) -> PeerResult<()> {
        let offer = RTCSessionDescription::offer(sdp.to_string())
            .map_err(|e| PeerError::Description(e.to_string()))?;
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| PeerError::Description(e.to_string()))
    }

    async fn create_answer(&self) -> PeerResult<String> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| PeerError::Description(e.to_string()))?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| PeerError::Description(e.to_string()))?;
        Ok(answer.sdp)
    }

    async fn add_ice_candidate(&self, mid: &str, index: u16, sdp: &str) -> PeerResult<()> {
        let candidate = RTCIceCandidateInit {
            candidate: sdp.to_string(),
            sdp_mid: Some(mid.to_string()),
            sdp_mline_index: Some(index),
            username_fragment: None,
        };
        self.pc
            .add_ice_candidate(candidate)
            .await
            .map_err(|e| PeerError::Candidate(e.to_string()))
    }

    async fn get_stats(&self) -> PeerResult<Value> {
        let report = self.pc.get_stats().await;
        let reports: Vec<_> = report.reports.into_values().collect();
        serde_json::to_value(reports).map_err(|e| PeerError::Stats(e.to_string()))
    }

    async fn init_tracks(&self) -> PeerResult<()> {
        for track in &self.tracks {
            self.pc
                .add_track(track.clone())
                .await
                .map_err(|e| PeerError::Track(e.to_string()))?;
        }
        Ok(())
    }

    async fn set_encoding_parameters(
        &self,
        encodings: Vec<RtpEncodingParameters>,
    ) -> PeerResult<()> {
        // webrtc-rs negotiates simulcast layers from the SDP rids; the
        // per-layer caps are kept for the application to apply
        debug!("Recording {} simulcast encodings", encodings.len());
        *self.encodings.lock() = encodings;
        Ok(())
    }

    async fn reset_encoding_parameters(&self) -> PeerResult<()> {
        self.encodings.lock().clear();
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!("Peer connection close failed: {}", e);
        }
    }
}
