//! Mock media engine

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rtsig_client::{
    IceConnectionState, PeerConnection, PeerConnectionFactory, PeerConnectionState, PeerError,
    PeerEvent, PeerEventSink, PeerResult,
};
use rtsig_core::{RtcConfiguration, RtpEncodingParameters};
use rtsig_transport::{DataChannel, DataChannelEvent, TransportError};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::wait_until;

/// One call made on the facade
#[derive(Debug, Clone, PartialEq)]
pub enum PeerCall {
    CreateConnection(RtcConfiguration),
    SetOffer(String),
    CreateAnswer,
    AddIceCandidate { mid: String, index: u16, sdp: String },
    GetStats,
    InitTracks,
    SetEncodingParameters(Vec<RtpEncodingParameters>),
    ResetEncodingParameters,
    Close,
}

impl PeerCall {
    pub fn name(&self) -> &'static str {
        match self {
            PeerCall::CreateConnection(_) => "create_connection",
            PeerCall::SetOffer(_) => "set_offer",
            PeerCall::CreateAnswer => "create_answer",
            PeerCall::AddIceCandidate { .. } => "add_ice_candidate",
            PeerCall::GetStats => "get_stats",
            PeerCall::InitTracks => "init_tracks",
            PeerCall::SetEncodingParameters(_) => "set_encoding_parameters",
            PeerCall::ResetEncodingParameters => "reset_encoding_parameters",
            PeerCall::Close => "close",
        }
    }
}

struct MockState {
    calls: Mutex<Vec<PeerCall>>,
    sink: Mutex<Option<PeerEventSink>>,
    answer_sdp: Mutex<String>,
    stats: Mutex<Value>,
    set_offer_delay: Mutex<Option<Duration>>,
    fail_create: AtomicBool,
    hang_on_close: AtomicBool,
    answers: AtomicUsize,
    /// Whether the callback fired from inside `close` was accepted by the sink
    late_post_accepted: Mutex<Option<bool>>,
}

/// Facade that records every call and lets tests play the engine's part
#[derive(Clone)]
pub struct MockPeerFactory {
    state: Arc<MockState>,
}

impl Default for MockPeerFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPeerFactory {
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState {
                calls: Mutex::new(Vec::new()),
                sink: Mutex::new(None),
                answer_sdp: Mutex::new("v=0 answer".to_string()),
                stats: Mutex::new(json!([{"type": "transport", "id": "T01"}])),
                set_offer_delay: Mutex::new(None),
                fail_create: AtomicBool::new(false),
                hang_on_close: AtomicBool::new(false),
                answers: AtomicUsize::new(0),
                late_post_accepted: Mutex::new(None),
            }),
        }
    }

    /// As a trait object for the builder
    pub fn shared(&self) -> Arc<dyn PeerConnectionFactory> {
        Arc::new(self.clone())
    }

    pub fn set_answer_sdp(&self, sdp: &str) {
        *self.state.answer_sdp.lock() = sdp.to_string();
    }

    pub fn set_stats(&self, stats: Value) {
        *self.state.stats.lock() = stats;
    }

    /// Make every `set_offer` take this long
    pub fn set_offer_delay(&self, delay: Duration) {
        *self.state.set_offer_delay.lock() = Some(delay);
    }

    /// Make `create_connection` fail
    pub fn fail_create(&self) {
        self.state.fail_create.store(true, Ordering::SeqCst);
    }

    /// Make `close` never return, like an engine stuck releasing its transports
    pub fn hang_on_close(&self) {
        self.state.hang_on_close.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<PeerCall> {
        self.state.calls.lock().clone()
    }

    pub fn call_names(&self) -> Vec<&'static str> {
        self.state.calls.lock().iter().map(PeerCall::name).collect()
    }

    pub fn count_of(&self, name: &str) -> usize {
        self.state
            .calls
            .lock()
            .iter()
            .filter(|c| c.name() == name)
            .count()
    }

    pub async fn wait_for_call(&self, name: &str, max_wait: Duration) -> bool {
        wait_until(|| self.count_of(name) > 0, max_wait).await
    }

    /// Result of the engine callback fired while the connection closed;
    /// `None` if the connection was never closed
    pub fn late_post_accepted(&self) -> Option<bool> {
        *self.state.late_post_accepted.lock()
    }

    /// Post an event as the engine would; false if there is no live session
    pub fn emit(&self, event: PeerEvent) -> bool {
        match self.state.sink.lock().as_ref() {
            Some(sink) => sink.post(event),
            None => false,
        }
    }

    /// Report ICE and the peer connection as connected
    pub fn connect_ice(&self) -> bool {
        self.emit(PeerEvent::IceConnectionState(IceConnectionState::Connected))
            && self.emit(PeerEvent::PeerConnectionState(
                PeerConnectionState::Connected,
            ))
    }

    /// Announce a remote data channel, optionally already open
    pub fn add_data_channel(&self, label: &str, open: bool) -> Arc<MockDataChannel> {
        let channel = MockDataChannel::new(label);
        self.emit(PeerEvent::DataChannel(channel.clone()));
        if open {
            self.open_data_channel(&channel);
        }
        channel
    }

    pub fn open_data_channel(&self, channel: &MockDataChannel) -> bool {
        channel.set_open(true);
        self.emit(PeerEvent::DataChannelEvent(DataChannelEvent::Open {
            label: channel.label().to_string(),
        }))
    }

    /// Deliver a payload as received on a data channel
    pub fn deliver(&self, label: &str, data: impl Into<Bytes>) -> bool {
        self.emit(PeerEvent::DataChannelEvent(DataChannelEvent::Message {
            label: label.to_string(),
            data: data.into(),
        }))
    }

    fn record(&self, call: PeerCall) {
        self.state.calls.lock().push(call);
    }
}

#[async_trait]
impl PeerConnectionFactory for MockPeerFactory {
    async fn create_connection(
        &self,
        config: RtcConfiguration,
        events: PeerEventSink,
    ) -> PeerResult<Arc<dyn PeerConnection>> {
        self.record(PeerCall::CreateConnection(config));
        if self.state.fail_create.load(Ordering::SeqCst) {
            return Err(PeerError::CreateFailed("mock refused".to_string()));
        }
        *self.state.sink.lock() = Some(events);
        Ok(Arc::new(MockPeerConnection {
            factory: self.clone(),
        }))
    }
}

struct MockPeerConnection {
    factory: MockPeerFactory,
}

#[async_trait]
impl PeerConnection for MockPeerConnection {
    async fn set_offer(&self, sdp: &str) -> PeerResult<()> {
        let delay = *self.factory.state.set_offer_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.factory.record(PeerCall::SetOffer(sdp.to_string()));
        Ok(())
    }

    async fn create_answer(&self) -> PeerResult<String> {
        self.factory.record(PeerCall::CreateAnswer);
        let n = self.factory.state.answers.fetch_add(1, Ordering::SeqCst);
        let sdp = self.factory.state.answer_sdp.lock().clone();
        Ok(if n == 0 { sdp } else { format!("{} {}", sdp, n) })
    }

    async fn add_ice_candidate(&self, mid: &str, index: u16, sdp: &str) -> PeerResult<()> {
        self.factory.record(PeerCall::AddIceCandidate {
            mid: mid.to_string(),
            index,
            sdp: sdp.to_string(),
        });
        Ok(())
    }

    async fn get_stats(&self) -> PeerResult<Value> {
        self.factory.record(PeerCall::GetStats);
        Ok(self.factory.state.stats.lock().clone())
    }

    async fn init_tracks(&self) -> PeerResult<()> {
        self.factory.record(PeerCall::InitTracks);
        Ok(())
    }

    async fn set_encoding_parameters(
        &self,
        encodings: Vec<RtpEncodingParameters>,
    ) -> PeerResult<()> {
        self.factory
            .record(PeerCall::SetEncodingParameters(encodings));
        Ok(())
    }

    async fn reset_encoding_parameters(&self) -> PeerResult<()> {
        self.factory.record(PeerCall::ResetEncodingParameters);
        Ok(())
    }

    async fn close(&self) {
        self.factory.record(PeerCall::Close);
        // Engines fire a final state change while closing
        let accepted = self
            .factory
            .emit(PeerEvent::IceConnectionState(IceConnectionState::Closed));
        *self.factory.state.late_post_accepted.lock() = Some(accepted);
        if self.factory.state.hang_on_close.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
    }
}

/// In-memory data channel
pub struct MockDataChannel {
    label: String,
    open: AtomicBool,
    closed: AtomicBool,
    hang_on_close: AtomicBool,
    sent: Mutex<Vec<Bytes>>,
}

impl MockDataChannel {
    pub fn new(label: &str) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            hang_on_close: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    /// Never report closed, so closing waits until its timeout
    pub fn hang_on_close(&self) {
        self.hang_on_close.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    /// Sent payloads as UTF-8 text (lossy)
    pub fn sent_text(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect()
    }

    /// Sent payloads parsed as JSON, skipping anything that is not
    pub fn sent_json(&self) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .filter_map(|b| serde_json::from_slice(b).ok())
            .collect()
    }
}

#[async_trait]
impl DataChannel for MockDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&self, data: Bytes) -> rtsig_transport::Result<()> {
        if !self.is_open() {
            return Err(TransportError::NotConnected);
        }
        self.sent.lock().push(data);
        Ok(())
    }

    async fn close(&self) -> rtsig_transport::Result<()> {
        if self.hang_on_close.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        self.open.store(false, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
