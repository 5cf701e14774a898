//! Signaling state machine
//!
//! Each connected [`Signaling`] owns one session task. The task is the only
//! place session state lives: API calls arrive as commands, the WebSocket
//! reader and the peer connection post events, and the watchdog is polled in
//! the same `select!`. Handlers run to completion (including any awaited
//! facade call) before the next message is taken, which is what keeps
//! inbound processing in arrival order.

use bytes::Bytes;
use parking_lot::RwLock;
use rtsig_core::{
    codec, is_app_label, CandidateMessage, ClientMessage, CompressedLabels, DisconnectMessage,
    ErrorCode, OfferMessage, PingMessage, RtpEncodingParameters, SdpMessage, ServerMessage,
    StatsMessage, SwitchedMessage, LABEL_NOTIFY, LABEL_PUSH, LABEL_SIGNALING, LABEL_STATS,
};
use rtsig_transport::{
    CloseOutcome, DataChannelEvent, DataChannelSet, TransportEvent, TransportReceiver,
    TransportSender, Watchdog, WebSocketConfig, WebSocketTransport,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::builder::SignalingBuilder;
use crate::config::SignalingConfig;
use crate::error::{ClientError, Result};
use crate::events::{EventQueue, SessionEvent, SignalingObserver};
use crate::peer::{
    IceConnectionState, PeerConnection, PeerConnectionFactory, PeerConnectionState, PeerEvent,
    PeerEventSink,
};

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Negotiating,
    Established,
    Closing,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

/// Snapshot of what the session has learned so far
#[derive(Debug, Clone, Default)]
pub struct SessionInfo {
    pub state: SessionState,
    /// The candidate URL that won the dial
    pub signaling_url: Option<String>,
    pub connection_id: Option<String>,
    pub client_id: Option<String>,
    pub metadata: Option<Value>,
    /// True once signaling has switched to the data channel
    pub using_data_channel: bool,
    pub ice_state: IceConnectionState,
}

enum Command {
    Close {
        done: oneshot::Sender<()>,
    },
    SendMessage {
        label: String,
        data: Bytes,
        done: oneshot::Sender<bool>,
    },
    GetStats {
        done: oneshot::Sender<Value>,
    },
}

impl Command {
    /// Answer a command that arrived after the session ended
    fn reject(self) {
        match self {
            Command::Close { done } => {
                let _ = done.send(());
            }
            Command::SendMessage { done, .. } => {
                let _ = done.send(false);
            }
            Command::GetStats { done } => {
                let _ = done.send(empty_stats());
            }
        }
    }
}

fn empty_stats() -> Value {
    Value::Array(Vec::new())
}

/// Handle to one signaling session
///
/// A `Signaling` drives a single session: call [`Signaling::connect`] once,
/// then [`Signaling::close`] (or drop the handle) to end it. Session events
/// are queued and delivered by [`Signaling::dispatch_events`].
pub struct Signaling {
    config: SignalingConfig,
    factory: Arc<dyn PeerConnectionFactory>,
    events: EventQueue,
    info: Arc<RwLock<SessionInfo>>,
    alive: Arc<AtomicBool>,
    commands: Option<mpsc::UnboundedSender<Command>>,
    started: bool,
}

impl Signaling {
    pub fn new(config: SignalingConfig, factory: Arc<dyn PeerConnectionFactory>) -> Self {
        Self {
            config,
            factory,
            events: EventQueue::new(),
            info: Arc::new(RwLock::new(SessionInfo::default())),
            alive: Arc::new(AtomicBool::new(true)),
            commands: None,
            started: false,
        }
    }

    /// Create a builder
    pub fn builder(url: &str) -> SignalingBuilder {
        SignalingBuilder::new(url)
    }

    /// Validate the configuration and start the session task
    ///
    /// Returns as soon as the task is running; progress is reported through
    /// the event queue. An invalid configuration is reported both as the
    /// returned error and as a `Disconnect` event with
    /// [`ErrorCode::InvalidParameter`]. Must be called within a tokio runtime.
    pub fn connect(&mut self) -> Result<()> {
        if self.started {
            return Err(ClientError::AlreadyConnected);
        }
        self.started = true;

        if let Err(e) = self.config.validate() {
            warn!("Refusing to connect: {}", e);
            self.info.write().state = SessionState::Failed;
            self.events.push(SessionEvent::Disconnect {
                code: e.code(),
                reason: e.to_string(),
            });
            return Err(e);
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();

        let session = Session::new(
            self.config.clone(),
            self.factory.clone(),
            self.events.clone(),
            self.info.clone(),
            self.alive.clone(),
            peer_tx,
        );
        tokio::spawn(session.run(command_rx, peer_rx));
        self.commands = Some(command_tx);

        Ok(())
    }

    /// End the session and wait for teardown to finish
    ///
    /// Safe to call any number of times; only the first call does anything.
    pub async fn close(&self) {
        let Some(commands) = &self.commands else {
            debug!("Close before connect, nothing to do");
            return;
        };
        let (done, wait) = oneshot::channel();
        if commands.send(Command::Close { done }).is_err() {
            debug!("Session already finished");
            return;
        }
        let _ = wait.await;
    }

    /// Send application data on a data channel
    ///
    /// Returns `Ok(false)` when the channel is not open; the data is dropped.
    pub async fn send_message(&self, label: &str, data: impl Into<Bytes>) -> Result<bool> {
        let commands = self.commands.as_ref().ok_or(ClientError::NotConnected)?;
        let (done, wait) = oneshot::channel();
        commands
            .send(Command::SendMessage {
                label: label.to_string(),
                data: data.into(),
                done,
            })
            .map_err(|_| ClientError::NotConnected)?;
        wait.await.map_err(|_| ClientError::NotConnected)
    }

    /// Current statistics report; an empty array when there is no peer connection
    pub async fn get_stats(&self) -> Value {
        let Some(commands) = &self.commands else {
            return empty_stats();
        };
        let (done, wait) = oneshot::channel();
        if commands.send(Command::GetStats { done }).is_err() {
            return empty_stats();
        }
        wait.await.unwrap_or_else(|_| empty_stats())
    }

    pub fn events(&self) -> &EventQueue {
        &self.events
    }

    /// Deliver queued events to `observer` on the calling thread
    pub fn dispatch_events(&self, observer: &mut dyn SignalingObserver) -> usize {
        self.events.dispatch(observer)
    }

    pub fn state(&self) -> SessionState {
        self.info.read().state
    }

    pub fn info(&self) -> SessionInfo {
        self.info.read().clone()
    }

    pub fn config(&self) -> &SignalingConfig {
        &self.config
    }
}

impl Drop for Signaling {
    fn drop(&mut self) {
        // The session task sees its command channel close and tears down
        // without reporting anything
        self.alive.store(false, Ordering::SeqCst);
    }
}

enum Teardown {
    /// Explicit close requested by the application
    Close,
    /// Unrecoverable failure, reported with its code
    Failure(ErrorCode, String),
    /// Handle dropped; nothing is reported
    Silent,
}

async fn next_transport_event(
    receiver: &mut Option<Box<dyn TransportReceiver>>,
) -> Option<TransportEvent> {
    match receiver.as_mut() {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

/// State owned by the session task
struct Session {
    config: SignalingConfig,
    factory: Arc<dyn PeerConnectionFactory>,
    events: EventQueue,
    info: Arc<RwLock<SessionInfo>>,
    alive: Arc<AtomicBool>,
    peer_tx: mpsc::UnboundedSender<PeerEvent>,

    state: SessionState,
    ws: Option<Box<dyn TransportSender>>,
    ws_rx: Option<Box<dyn TransportReceiver>>,
    ws_error: Option<String>,
    pc: Option<Arc<dyn PeerConnection>>,
    data_channels: DataChannelSet,
    compressed: CompressedLabels,
    encodings: Option<Vec<RtpEncodingParameters>>,
    using_data_channel: bool,
    ignore_disconnect_websocket: bool,
    ice_state: IceConnectionState,
    answer_sent: bool,
    /// Local track id -> connection id of the remote that produced it
    tracks: HashMap<String, String>,
    watchdog: Watchdog,
    finished: bool,
}

impl Session {
    fn new(
        config: SignalingConfig,
        factory: Arc<dyn PeerConnectionFactory>,
        events: EventQueue,
        info: Arc<RwLock<SessionInfo>>,
        alive: Arc<AtomicBool>,
        peer_tx: mpsc::UnboundedSender<PeerEvent>,
    ) -> Self {
        Self {
            config,
            factory,
            events,
            info,
            alive,
            peer_tx,
            state: SessionState::Idle,
            ws: None,
            ws_rx: None,
            ws_error: None,
            pc: None,
            data_channels: DataChannelSet::new(),
            compressed: CompressedLabels::new(),
            encodings: None,
            using_data_channel: false,
            ignore_disconnect_websocket: false,
            ice_state: IceConnectionState::New,
            answer_sent: false,
            tracks: HashMap::new(),
            watchdog: Watchdog::new(),
            finished: false,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut peer_rx: mpsc::UnboundedReceiver<PeerEvent>,
    ) {
        self.set_state(SessionState::Connecting);
        self.watchdog.enable(self.config.connection_timeout);

        if self.dial(&mut commands).await {
            let connect = ClientMessage::Connect(self.config.connect_message());
            self.send_signaling(connect).await;
            self.set_state(SessionState::Negotiating);

            while !self.finished {
                tokio::select! {
                    command = commands.recv() => match command {
                        Some(command) => self.handle_command(command).await,
                        None => self.teardown(Teardown::Silent).await,
                    },
                    event = next_transport_event(&mut self.ws_rx) => {
                        self.handle_transport_event(event).await
                    }
                    Some(event) = peer_rx.recv() => self.handle_peer_event(event).await,
                    _ = self.watchdog.expired() => {
                        self.fail(ErrorCode::InternalError, "connection timed out").await
                    }
                }
            }
        }

        // Answer whatever queued up behind the teardown
        commands.close();
        while let Ok(command) = commands.try_recv() {
            command.reject();
        }
        debug!("Session task finished in state {:?}", self.state);
    }

    /// Dial every signaling URL; returns false if the session ended instead
    async fn dial(&mut self, commands: &mut mpsc::UnboundedReceiver<Command>) -> bool {
        let transport = WebSocketTransport::with_config(WebSocketConfig {
            insecure: self.config.insecure,
            ..Default::default()
        });
        let urls = self.config.signaling_urls.clone();
        let dial = transport.connect_first(&urls);
        tokio::pin!(dial);

        loop {
            tokio::select! {
                result = &mut dial => {
                    return match result {
                        Ok((sender, receiver, url)) => {
                            self.info.write().signaling_url = Some(url);
                            self.ws = Some(Box::new(sender));
                            self.ws_rx = Some(Box::new(receiver));
                            true
                        }
                        Err(e) => {
                            self.fail(ErrorCode::WebsocketHandshakeFailed, e.to_string())
                                .await;
                            false
                        }
                    };
                }
                command = commands.recv() => match command {
                    Some(command) => {
                        self.handle_command(command).await;
                        if self.finished {
                            info!("Session ended while connecting");
                            return false;
                        }
                    }
                    None => {
                        self.teardown(Teardown::Silent).await;
                        return false;
                    }
                },
                _ = self.watchdog.expired() => {
                    self.fail(ErrorCode::InternalError, "connection timed out").await;
                    return false;
                }
            }
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!("Session state {:?} -> {:?}", self.state, state);
            self.state = state;
            self.info.write().state = state;
        }
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Close { done } => {
                self.teardown(Teardown::Close).await;
                let _ = done.send(());
            }
            Command::SendMessage { label, data, done } => {
                let sent = self.send_app_message(&label, data).await;
                let _ = done.send(sent);
            }
            Command::GetStats { done } => {
                let stats = self.collect_stats().await;
                let _ = done.send(stats);
            }
        }
    }

    async fn send_app_message(&mut self, label: &str, data: Bytes) -> bool {
        if !self.data_channels.is_open(label) {
            warn!("Data channel {} is not open, dropping message", label);
            return false;
        }
        let payload = match self.compressed.encode(label, &data) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to compress message for {}: {}", label, e);
                return false;
            }
        };
        match self.data_channels.send(label, payload).await {
            Ok(sent) => sent,
            Err(e) => {
                warn!("Send on {} failed: {}", label, e);
                false
            }
        }
    }

    async fn collect_stats(&mut self) -> Value {
        let Some(pc) = self.pc.clone() else {
            return empty_stats();
        };
        match pc.get_stats().await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Failed to get stats: {}", e);
                empty_stats()
            }
        }
    }

    // ------------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------------

    /// Send a signaling message on whichever carrier is active
    async fn send_signaling(&mut self, message: ClientMessage) {
        if self.using_data_channel {
            self.send_on_channel(LABEL_SIGNALING, &message).await;
            return;
        }

        let text = match codec::encode(&message) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode {}: {}", message.type_name(), e);
                return;
            }
        };
        match &self.ws {
            Some(ws) => match ws.send(text).await {
                Ok(()) => debug!("Sent {} over websocket", message.type_name()),
                Err(e) => warn!("Failed to send {}: {}", message.type_name(), e),
            },
            None => warn!("No websocket, dropping {}", message.type_name()),
        }
    }

    async fn send_on_channel(&mut self, label: &str, message: &ClientMessage) -> bool {
        let payload = codec::encode(message)
            .and_then(|text| self.compressed.encode(label, text.as_bytes()));
        let payload = match payload {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode {}: {}", message.type_name(), e);
                return false;
            }
        };
        match self.data_channels.send(label, payload).await {
            Ok(true) => {
                debug!("Sent {} over data channel {}", message.type_name(), label);
                true
            }
            Ok(false) => {
                warn!(
                    "Data channel {} not open, dropping {}",
                    label,
                    message.type_name()
                );
                false
            }
            Err(e) => {
                warn!("Failed to send {} on {}: {}", message.type_name(), label, e);
                false
            }
        }
    }

    // ------------------------------------------------------------------------
    // Inbound signaling
    // ------------------------------------------------------------------------

    async fn handle_transport_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Connected) => debug!("WebSocket connected"),
            Some(TransportEvent::Text(text)) => self.handle_signaling(&text).await,
            Some(TransportEvent::Error(e)) => {
                warn!("WebSocket error: {}", e);
                self.ws_error = Some(e);
            }
            Some(TransportEvent::Disconnected { reason }) => self.websocket_closed(reason).await,
            None => self.websocket_closed(None).await,
        }
    }

    async fn websocket_closed(&mut self, reason: Option<String>) {
        self.ws_rx = None;
        if self.using_data_channel && self.ignore_disconnect_websocket {
            info!("WebSocket closed after switch-over, signaling continues on data channel");
            self.ws = None;
            return;
        }

        let (code, reason) = match self.ws_error.take() {
            Some(error) => (ErrorCode::WebsocketOnError, error),
            None => (
                ErrorCode::WebsocketOnClose,
                reason.unwrap_or_else(|| "websocket closed".to_string()),
            ),
        };
        self.fail(code, reason).await;
    }

    /// Handle one signaling message from either carrier
    async fn handle_signaling(&mut self, text: &str) {
        let message = match codec::decode(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(code = %ErrorCode::InvalidParameter, "Dropping malformed message: {}", e);
                return;
            }
        };
        debug!("Received {}", message.type_name());

        match message {
            ServerMessage::Offer(offer) => self.handle_offer(offer).await,
            request @ (ServerMessage::Update(_) | ServerMessage::ReOffer(_)) => {
                self.handle_renegotiation(request).await
            }
            ServerMessage::Candidate(candidate) => self.handle_remote_candidate(candidate).await,
            ServerMessage::Notify(_) => {
                self.events.push(SessionEvent::Notify(text.to_string()));
            }
            ServerMessage::Push(_) => {
                self.events.push(SessionEvent::Push(text.to_string()));
            }
            ServerMessage::Ping(ping) => self.handle_ping(ping).await,
            ServerMessage::Switched(switched) => self.handle_switched(switched).await,
            ServerMessage::ReqStats => debug!("Ignoring req-stats outside the stats channel"),
            ServerMessage::Unknown => {
                debug!(
                    "Ignoring message of unknown type {:?}",
                    codec::message_type(text)
                );
            }
        }
    }

    async fn handle_offer(&mut self, offer: OfferMessage) {
        if self.pc.is_some() {
            warn!("Ignoring second offer");
            return;
        }

        if self.compressed.populate(&offer.data_channels) {
            debug!("{} compressed data channel labels", self.compressed.len());
        }
        {
            let mut info = self.info.write();
            info.connection_id = offer.connection_id.clone();
            info.client_id = offer.client_id.clone();
            info.metadata = offer.metadata.clone();
        }

        let sink = PeerEventSink::new(self.peer_tx.clone(), self.alive.clone());
        let pc = match self.factory.create_connection(offer.config, sink).await {
            Ok(pc) => pc,
            Err(e) => {
                self.fail(ErrorCode::InternalError, e.to_string()).await;
                return;
            }
        };
        self.pc = Some(pc.clone());

        if let Err(e) = pc.set_offer(&offer.sdp).await {
            self.fail(ErrorCode::InternalError, e.to_string()).await;
            return;
        }
        self.events.push(SessionEvent::Offer { sdp: offer.sdp });

        if let Err(e) = pc.init_tracks().await {
            self.fail(ErrorCode::InternalError, e.to_string()).await;
            return;
        }
        if self.config.simulcast {
            if let Some(encodings) = offer.encodings {
                if let Err(e) = pc.set_encoding_parameters(encodings.clone()).await {
                    warn!("Failed to apply encodings: {}", e);
                }
                self.encodings = Some(encodings);
            }
        }

        let sdp = match pc.create_answer().await {
            Ok(sdp) => sdp,
            Err(e) => {
                self.fail(ErrorCode::InternalError, e.to_string()).await;
                return;
            }
        };
        self.send_signaling(ClientMessage::Answer(SdpMessage::new(sdp)))
            .await;
        self.answer_sent = true;
        self.set_state(SessionState::Established);
    }

    async fn handle_renegotiation(&mut self, request: ServerMessage) {
        let sdp = match &request {
            ServerMessage::Update(message) | ServerMessage::ReOffer(message) => {
                message.sdp.clone()
            }
            _ => return,
        };
        let Some(pc) = self.pc.clone() else {
            warn!("Ignoring {} before offer", request.type_name());
            return;
        };

        self.set_state(SessionState::Negotiating);
        if let Err(e) = pc.set_offer(&sdp).await {
            error!("Failed to apply {}: {}", request.type_name(), e);
            self.set_state(SessionState::Established);
            return;
        }

        // A new description clears simulcast state
        if self.config.simulcast {
            if let Err(e) = pc.reset_encoding_parameters().await {
                warn!("Failed to reset encodings: {}", e);
            }
            if let Some(encodings) = self.encodings.clone() {
                if let Err(e) = pc.set_encoding_parameters(encodings).await {
                    warn!("Failed to reapply encodings: {}", e);
                }
            }
        }

        match pc.create_answer().await {
            Ok(answer) => {
                if let Some(reply) = codec::renegotiation_answer(&request, answer) {
                    self.send_signaling(reply).await;
                }
            }
            Err(e) => error!("Failed to answer {}: {}", request.type_name(), e),
        }
        self.set_state(SessionState::Established);
    }

    async fn handle_remote_candidate(&mut self, candidate: CandidateMessage) {
        let Some(pc) = self.pc.clone() else {
            warn!("Candidate before offer, dropping");
            return;
        };
        let mid = candidate.sdp_mid.as_deref().unwrap_or_default();
        let index = candidate.sdp_mline_index.unwrap_or(0);
        if let Err(e) = pc.add_ice_candidate(mid, index, &candidate.candidate).await {
            warn!("Failed to add candidate: {}", e);
        }
    }

    async fn handle_ping(&mut self, ping: PingMessage) {
        if !self.ice_state.is_connected() {
            debug!("Ignoring ping, ICE is {:?}", self.ice_state);
            return;
        }
        let stats = if ping.stats {
            Some(self.collect_stats().await)
        } else {
            None
        };
        self.send_signaling(codec::pong(stats)).await;
    }

    async fn handle_switched(&mut self, switched: SwitchedMessage) {
        info!("Signaling switched to data channel");
        self.using_data_channel = true;
        self.ignore_disconnect_websocket = switched.ignore_disconnect_websocket
            || self.config.ignore_disconnect_websocket.unwrap_or(false);
        self.info.write().using_data_channel = true;

        if switched.ignore_disconnect_websocket {
            self.ws_rx = None;
            if let Some(ws) = self.ws.take() {
                let timeout = self.config.websocket_close_timeout;
                tokio::spawn(async move {
                    match ws.close(timeout).await {
                        Ok(outcome) => debug!("WebSocket closed after switch-over: {:?}", outcome),
                        Err(e) => debug!("WebSocket close after switch-over failed: {}", e),
                    }
                });
            }
        }
    }

    // ------------------------------------------------------------------------
    // Peer connection events
    // ------------------------------------------------------------------------

    async fn handle_peer_event(&mut self, event: PeerEvent) {
        if self.finished {
            return;
        }
        match event {
            PeerEvent::IceConnectionState(state) => {
                debug!("ICE connection state {:?}", state);
                self.ice_state = state;
                self.info.write().ice_state = state;
                if state == IceConnectionState::Failed {
                    self.fail(ErrorCode::IceFailed, "ICE connection failed").await;
                }
            }
            PeerEvent::PeerConnectionState(state) => {
                debug!("Peer connection state {:?}", state);
                match state {
                    PeerConnectionState::Connected => {
                        self.watchdog.disable();
                        if self.answer_sent {
                            self.set_state(SessionState::Established);
                        }
                    }
                    PeerConnectionState::Failed => {
                        self.fail(
                            ErrorCode::PeerConnectionStateFailed,
                            "peer connection failed",
                        )
                        .await;
                    }
                    _ => {}
                }
            }
            PeerEvent::IceCandidate { mid, index, sdp } => {
                let candidate = CandidateMessage {
                    candidate: sdp,
                    sdp_mid: Some(mid),
                    sdp_mline_index: Some(index),
                };
                self.send_signaling(ClientMessage::Candidate(candidate)).await;
            }
            PeerEvent::TrackAdded {
                track_id,
                stream_ids,
            } => {
                let connection_id = stream_ids.into_iter().next().unwrap_or_default();
                debug!("Track {} added for {}", track_id, connection_id);
                self.tracks.insert(track_id.clone(), connection_id.clone());
                self.events.push(SessionEvent::TrackAdded {
                    track_id,
                    connection_id,
                });
            }
            PeerEvent::TrackRemoved { track_id } => match self.tracks.remove(&track_id) {
                Some(connection_id) => {
                    debug!("Track {} removed for {}", track_id, connection_id);
                    self.events.push(SessionEvent::TrackRemoved {
                        track_id,
                        connection_id,
                    });
                }
                None => debug!("Removal of unknown track {}", track_id),
            },
            PeerEvent::DataChannel(channel) => {
                debug!("Data channel {} announced", channel.label());
                self.data_channels.insert(channel);
            }
            PeerEvent::DataChannelEvent(event) => self.handle_data_channel_event(event).await,
        }
    }

    async fn handle_data_channel_event(&mut self, event: DataChannelEvent) {
        match event {
            DataChannelEvent::Open { label } => {
                debug!("Data channel {} open", label);
                if is_app_label(&label) {
                    self.events.push(SessionEvent::DataChannelOpen { label });
                }
            }
            DataChannelEvent::Closed { label } => {
                debug!("Data channel {} closed", label);
                self.data_channels.remove(&label);
            }
            DataChannelEvent::Message { label, data } => {
                self.handle_data_channel_message(label, data).await
            }
        }
    }

    async fn handle_data_channel_message(&mut self, label: String, data: Bytes) {
        let payload = match self.compressed.decode(&label, &data) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(code = %ErrorCode::InvalidParameter, "Dropping payload on {}: {}", label, e);
                return;
            }
        };

        if is_app_label(&label) {
            self.events.push(SessionEvent::Message {
                label,
                data: payload,
            });
            return;
        }

        let text = match String::from_utf8(payload.to_vec()) {
            Ok(text) => text,
            Err(_) => {
                warn!(code = %ErrorCode::InvalidParameter, "Dropping non-UTF-8 payload on {}", label);
                return;
            }
        };
        match label.as_str() {
            LABEL_SIGNALING => self.handle_signaling(&text).await,
            LABEL_STATS => self.handle_stats_request(&text).await,
            LABEL_NOTIFY => {
                self.events.push(SessionEvent::Notify(text));
            }
            LABEL_PUSH => {
                self.events.push(SessionEvent::Push(text));
            }
            other => debug!("Ignoring message on data channel {}", other),
        }
    }

    async fn handle_stats_request(&mut self, text: &str) {
        match codec::decode(text) {
            Ok(ServerMessage::ReqStats) => {
                let reports = self.collect_stats().await;
                let reply = ClientMessage::Stats(StatsMessage { reports });
                self.send_on_channel(LABEL_STATS, &reply).await;
            }
            Ok(other) => debug!("Ignoring {} on stats channel", other.type_name()),
            Err(e) => {
                warn!(code = %ErrorCode::InvalidParameter, "Dropping malformed stats request: {}", e)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    async fn fail(&mut self, code: ErrorCode, reason: impl Into<String>) {
        let reason = reason.into();
        if self.finished {
            debug!("Ignoring {} during teardown: {}", code, reason);
            return;
        }
        error!("Session failed: {} ({})", code, reason);
        self.teardown(Teardown::Failure(code, reason)).await;
    }

    /// Shut the session down; runs at most once
    ///
    /// Data channels first (with the farewell if signaling moved there), then
    /// the websocket, then the peer connection. Each stage is time-bounded.
    async fn teardown(&mut self, kind: Teardown) {
        if self.finished {
            return;
        }
        self.finished = true;
        if matches!(kind, Teardown::Silent) {
            self.events.seal();
        }
        self.set_state(SessionState::Closing);
        self.watchdog.disable();

        let farewell = codec::encode(&ClientMessage::Disconnect(DisconnectMessage::default()));
        let dc_timeout = self.config.disconnect_wait_timeout;

        if self.using_data_channel {
            if self.data_channels.is_open(LABEL_SIGNALING) {
                let payload = match &farewell {
                    Ok(text) => self.compressed.encode(LABEL_SIGNALING, text.as_bytes()).ok(),
                    Err(_) => None,
                };
                let outcome = self
                    .data_channels
                    .close(payload.map(|p| (LABEL_SIGNALING, p)), dc_timeout)
                    .await;
                debug!("Data channels closed with farewell: {:?}", outcome);
            } else {
                // The signaling channel never opened: nothing to say goodbye on
                debug!("Signaling data channel not open, skipping farewell");
                self.data_channels.close(None, dc_timeout).await;
            }
        } else if !self.data_channels.is_empty() {
            let outcome = self.data_channels.close(None, dc_timeout).await;
            debug!("Data channels closed: {:?}", outcome);
        }

        // Queueing the disconnect and the close handshake share one deadline
        let ws_deadline = Instant::now() + self.config.websocket_close_timeout;
        self.ws_rx = None;
        let mut ws_outcome = None;
        if let Some(ws) = self.ws.take() {
            if !self.using_data_channel && ws.is_connected() {
                if let Ok(text) = &farewell {
                    match tokio::time::timeout_at(ws_deadline, ws.send(text.clone())).await {
                        Ok(Ok(())) => debug!("Sent disconnect over websocket"),
                        Ok(Err(e)) => warn!("Failed to send disconnect: {}", e),
                        Err(_) => warn!("Timed out queueing disconnect"),
                    }
                }
            }
            let remaining = ws_deadline.saturating_duration_since(Instant::now());
            ws_outcome = Some(ws.close(remaining).await);
        }

        // Late engine callbacks fired while the connection is released are dropped
        self.alive.store(false, Ordering::SeqCst);
        if let Some(pc) = self.pc.take() {
            if tokio::time::timeout(dc_timeout, pc.close()).await.is_err() {
                warn!("Peer connection did not close within {:?}", dc_timeout);
            }
        }
        self.tracks.clear();

        match kind {
            Teardown::Close => {
                let (code, reason) = match ws_outcome {
                    Some(Ok(CloseOutcome::TimedOut)) => (
                        ErrorCode::CloseFailed,
                        "websocket close timed out".to_string(),
                    ),
                    Some(Err(e)) => (ErrorCode::CloseFailed, e.to_string()),
                    _ => (ErrorCode::CloseSucceeded, "closed".to_string()),
                };
                info!("Session closed: {}", code);
                self.events.push(SessionEvent::Disconnect { code, reason });
                self.set_state(SessionState::Closed);
            }
            Teardown::Failure(code, reason) => {
                self.events.push(SessionEvent::Disconnect { code, reason });
                self.set_state(SessionState::Failed);
            }
            Teardown::Silent => self.set_state(SessionState::Closed),
        }
    }
}
