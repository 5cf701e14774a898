//! WebSocket transport implementation
//!
//! Text frames only. Every connection is split into a writer task fed by a
//! queue (so concurrent sends never interleave) and a reader task that
//! forwards frames as [`TransportEvent`]s in arrival order.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tokio_tungstenite::{
    connect_async_tls_with_config,
    tungstenite::{
        client::IntoClientRequest,
        protocol::{frame::coding::CloseCode, CloseFrame, Message as WsMessage},
    },
    Connector, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::{
    CloseOutcome, Transport, TransportEvent, TransportReceiver, TransportSender, TransportServer,
};

/// WebSocket configuration
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Maximum message size, matching the inflate cap for compressed payloads
    pub max_message_size: usize,
    /// Depth of the outbound write queue and the inbound event queue
    pub queue_capacity: usize,
    /// Skip TLS certificate verification for `wss://`
    pub insecure: bool,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_message_size: rtsig_core::MAX_PAYLOAD_SIZE,
            queue_capacity: 100,
            insecure: false,
        }
    }
}

/// WebSocket transport
pub struct WebSocketTransport {
    config: WebSocketConfig,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self {
            config: WebSocketConfig::default(),
        }
    }

    pub fn with_config(config: WebSocketConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }

    /// Dial every candidate concurrently and keep the first that succeeds
    ///
    /// Returns the winning URL alongside the connection. The remaining
    /// attempts are dropped.
    pub async fn connect_first(
        &self,
        urls: &[String],
    ) -> Result<(WebSocketSender, WebSocketReceiver, String)> {
        if urls.is_empty() {
            return Err(TransportError::InvalidUrl("no url given".to_string()));
        }

        let attempts = urls.iter().map(|url| {
            Box::pin(async move {
                let (sender, receiver) = self.connect(url).await.map_err(|e| {
                    warn!("Connect to {} failed: {}", url, e);
                    e
                })?;
                Ok::<_, TransportError>((sender, receiver, url.clone()))
            })
        });

        let (winner, _rest) = futures::future::select_ok(attempts).await?;
        info!("Using signaling url {}", winner.2);
        Ok(winner)
    }

    fn tls_connector(&self) -> Result<Option<Connector>> {
        if !self.config.insecure {
            return Ok(None);
        }
        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        Ok(Some(Connector::NativeTls(tls)))
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a signaling URL: must parse and use `ws` or `wss`
pub fn validate_url(url: &str) -> Result<url::Url> {
    let parsed = url::Url::parse(url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(parsed),
        other => Err(TransportError::InvalidUrl(format!(
            "unsupported scheme: {}",
            other
        ))),
    }
}

/// WebSocket sender
pub struct WebSocketSender {
    tx: mpsc::Sender<WsMessage>,
    connected: Arc<Mutex<bool>>,
    closing: AtomicBool,
    closed: watch::Receiver<bool>,
    tasks: Vec<AbortHandle>,
}

impl WebSocketSender {
    fn abort(&self) {
        for task in &self.tasks {
            task.abort();
        }
        *self.connected.lock() = false;
    }
}

#[async_trait]
impl TransportSender for WebSocketSender {
    async fn send(&self, text: String) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        self.tx
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock() && !self.closing.load(Ordering::SeqCst)
    }

    async fn close(&self, timeout: Duration) -> Result<CloseOutcome> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Ok(CloseOutcome::AlreadyClosed);
        }
        if *self.closed.borrow() {
            debug!("WebSocket already closed by peer");
            self.abort();
            return Ok(CloseOutcome::AlreadyClosed);
        }

        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        let mut closed = self.closed.clone();
        let handshake = async {
            if self.tx.send(WsMessage::Close(Some(frame))).await.is_err() {
                debug!("WebSocket writer already gone");
            }
            // An Err here means the reader task is gone, which is closed too
            let _ = closed.wait_for(|c| *c).await;
        };

        match tokio::time::timeout(timeout, handshake).await {
            Ok(()) => {
                info!("WebSocket closed");
                *self.connected.lock() = false;
                Ok(CloseOutcome::Graceful)
            }
            Err(_) => {
                warn!("WebSocket close handshake timed out after {:?}", timeout);
                self.abort();
                Ok(CloseOutcome::TimedOut)
            }
        }
    }
}

impl Drop for WebSocketSender {
    fn drop(&mut self) {
        self.abort();
    }
}

/// WebSocket receiver
pub struct WebSocketReceiver {
    rx: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for WebSocketReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

/// Split a connected stream into writer and reader tasks
fn spawn_io<S>(ws_stream: WebSocketStream<S>, capacity: usize) -> (WebSocketSender, WebSocketReceiver)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (write, read) = ws_stream.split();

    let (send_tx, mut send_rx) = mpsc::channel::<WsMessage>(capacity);
    let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(capacity);
    let (closed_tx, closed_rx) = watch::channel(false);

    let connected = Arc::new(Mutex::new(true));
    let connected_write = connected.clone();
    let connected_read = connected.clone();

    // Spawn writer task
    let writer = tokio::spawn(async move {
        let mut write = write;
        while let Some(msg) = send_rx.recv().await {
            if let Err(e) = write.send(msg).await {
                error!("WebSocket write error: {}", e);
                break;
            }
        }
        *connected_write.lock() = false;
    });

    // Spawn reader task
    let reader = tokio::spawn(async move {
        let mut read = read;

        let _ = event_tx.send(TransportEvent::Connected).await;

        // Set once a close frame arrives; reading continues afterwards so
        // tungstenite can flush its close reply
        let mut close_reason: Option<Option<String>> = None;
        let mut error_reason = None;
        while let Some(result) = read.next().await {
            match result {
                Ok(WsMessage::Text(text)) => {
                    let _ = event_tx.send(TransportEvent::Text(text)).await;
                }
                Ok(WsMessage::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => {
                        warn!("Received binary frame, treating as text");
                        let _ = event_tx.send(TransportEvent::Text(text)).await;
                    }
                    Err(_) => warn!("Dropping non-UTF-8 binary frame"),
                },
                Ok(WsMessage::Ping(_)) => {
                    // Pong is handled automatically by tungstenite
                    debug!("Received ping");
                }
                Ok(WsMessage::Pong(_)) => {
                    debug!("Received pong");
                }
                Ok(WsMessage::Close(frame)) => {
                    let reason = frame.map(|f| format!("{} {}", u16::from(f.code), f.reason));
                    info!("WebSocket closed: {:?}", reason);
                    let _ = closed_tx.send(true);
                    close_reason = Some(reason);
                }
                Ok(WsMessage::Frame(_)) => {
                    // Raw frame, ignore
                }
                Err(e) => {
                    if close_reason.is_none() {
                        error!("WebSocket read error: {}", e);
                        let _ = event_tx.send(TransportEvent::Error(e.to_string())).await;
                        error_reason = Some(e.to_string());
                    }
                    break;
                }
            }
        }

        *connected_read.lock() = false;
        // Signal close completion before the final event so a pending close
        // never waits on a full event queue
        let _ = closed_tx.send(true);
        let reason = close_reason.unwrap_or(error_reason);
        let _ = event_tx.send(TransportEvent::Disconnected { reason }).await;
    });

    let sender = WebSocketSender {
        tx: send_tx,
        connected,
        closing: AtomicBool::new(false),
        closed: closed_rx,
        tasks: vec![writer.abort_handle(), reader.abort_handle()],
    };

    let receiver = WebSocketReceiver { rx: event_rx };

    (sender, receiver)
}

#[async_trait]
impl Transport for WebSocketTransport {
    type Sender = WebSocketSender;
    type Receiver = WebSocketReceiver;

    async fn connect(&self, url: &str) -> Result<(Self::Sender, Self::Receiver)> {
        // Dial the normalized form: the handshake only knows lowercase schemes
        let parsed = validate_url(url)?;
        info!("Connecting to WebSocket: {}", url);

        let request = parsed
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

        let mut ws_config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(self.config.max_message_size);

        let connector = self.tls_connector()?;
        let (ws_stream, response) =
            connect_async_tls_with_config(request, Some(ws_config), false, connector)
                .await
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        debug!("WebSocket connected, response: {:?}", response.status());

        Ok(spawn_io(ws_stream, self.config.queue_capacity))
    }
}

/// WebSocket server
pub struct WebSocketServer {
    listener: tokio::net::TcpListener,
    config: WebSocketConfig,
}

impl WebSocketServer {
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        info!("WebSocket server listening on {}", addr);

        Ok(Self {
            listener,
            config: WebSocketConfig::default(),
        })
    }

    pub fn with_config(mut self, config: WebSocketConfig) -> Self {
        self.config = config;
        self
    }
}

#[async_trait]
impl TransportServer for WebSocketServer {
    type Sender = WebSocketSender;
    type Receiver = WebSocketReceiver;

    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, SocketAddr)> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        debug!("Accepted TCP connection from {}", addr);

        let mut ws_config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(self.config.max_message_size);

        let ws_stream = tokio_tungstenite::accept_async_with_config(stream, Some(ws_config))
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        info!("WebSocket client connected from {}", addr);

        let (sender, receiver) = spawn_io(ws_stream, self.config.queue_capacity);
        Ok((sender, receiver, addr))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(TransportError::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_config() {
        let config = WebSocketConfig::default();
        assert_eq!(config.max_message_size, rtsig_core::MAX_PAYLOAD_SIZE);
        assert!(!config.insecure);
        assert_eq!(config.queue_capacity, 100);
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("wss://example.com/signaling").is_ok());
        assert!(validate_url("ws://127.0.0.1:5000/signaling").is_ok());
        assert!(matches!(
            validate_url("https://example.com"),
            Err(TransportError::InvalidUrl(_))
        ));
        assert!(matches!(
            validate_url("not a url"),
            Err(TransportError::InvalidUrl(_))
        ));

        // Scheme is case-insensitive, host is mandatory
        assert!(validate_url("WSS://example.com/signaling").is_ok());
        assert!(validate_url("ws://").is_err());
        assert!(validate_url("wss://").is_err());
        assert!(validate_url("ws://exa mple.com/x").is_err());
    }

    #[tokio::test]
    async fn test_connect_first_requires_url() {
        let transport = WebSocketTransport::new();
        assert!(matches!(
            transport.connect_first(&[]).await,
            Err(TransportError::InvalidUrl(_))
        ));
    }
}
