//! Scripted signaling peer

use anyhow::{anyhow, Result};
use futures::StreamExt;
use parking_lot::Mutex;
use rtsig_transport::{
    TransportEvent, TransportReceiver, TransportSender, TransportServer, WebSocketServer,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::{wait_until, DEFAULT_TIMEOUT};

enum ServerCommand {
    Send(String, oneshot::Sender<Result<()>>),
    Close(oneshot::Sender<()>),
}

#[derive(Default)]
struct ServerState {
    received: Mutex<Vec<Value>>,
    current: Mutex<Option<mpsc::UnboundedSender<ServerCommand>>>,
    connections: AtomicU32,
    disconnections: AtomicU32,
}

/// A signaling server on `127.0.0.1` that records what clients send and
/// sends whatever the test tells it to
///
/// Stops on drop.
pub struct TestSignalingServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    handle: Option<JoinHandle<()>>,
}

impl TestSignalingServer {
    /// Start a server that answers the close handshake normally
    pub async fn start() -> Self {
        let mut server = WebSocketServer::bind("127.0.0.1:0")
            .await
            .expect("bind test server");
        let addr = server.local_addr().expect("test server address");
        let state = Arc::new(ServerState::default());

        let accept_state = state.clone();
        let handle = tokio::spawn(async move {
            while let Ok((sender, receiver, peer)) = server.accept().await {
                debug!("Test server accepted {}", peer);
                let (tx, rx) = mpsc::unbounded_channel();
                *accept_state.current.lock() = Some(tx);
                accept_state.connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve_connection(
                    accept_state.clone(),
                    Box::new(sender),
                    Box::new(receiver),
                    rx,
                ));
            }
        });

        Self {
            addr,
            state,
            handle: Some(handle),
        }
    }

    /// Start a server that records the first message of each client and
    /// then never reads again, so close handshakes never complete
    pub async fn start_stalled() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stalled server");
        let addr = listener.local_addr().expect("stalled server address");
        let state = Arc::new(ServerState::default());

        let accept_state = state.clone();
        let handle = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                accept_state.connections.fetch_add(1, Ordering::SeqCst);
                if let Some(Ok(msg)) = ws.next().await {
                    if let Ok(text) = msg.to_text() {
                        if let Ok(value) = serde_json::from_str(text) {
                            accept_state.received.lock().push(value);
                        }
                    }
                }
                held.push(ws);
            }
        });

        Self {
            addr,
            state,
            handle: Some(handle),
        }
    }

    /// Signaling URL of this server
    pub fn url(&self) -> String {
        format!("ws://{}/signaling", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Every message received so far, in order
    pub fn messages(&self) -> Vec<Value> {
        self.state.received.lock().clone()
    }

    /// The `type` of every message received so far, in order
    pub fn message_types(&self) -> Vec<String> {
        self.state
            .received
            .lock()
            .iter()
            .filter_map(|m| m.get("type").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    /// Messages of one type, in order
    pub fn messages_of(&self, kind: &str) -> Vec<Value> {
        self.state
            .received
            .lock()
            .iter()
            .filter(|m| m.get("type").and_then(Value::as_str) == Some(kind))
            .cloned()
            .collect()
    }

    pub fn count_of(&self, kind: &str) -> usize {
        self.messages_of(kind).len()
    }

    /// Wait for the first message of a type
    pub async fn wait_for_message(&self, kind: &str, max_wait: Duration) -> Option<Value> {
        if wait_until(|| self.count_of(kind) > 0, max_wait).await {
            self.messages_of(kind).into_iter().next()
        } else {
            None
        }
    }

    /// Wait until `n` messages of a type have arrived
    pub async fn wait_for_count(&self, kind: &str, n: usize, max_wait: Duration) -> bool {
        wait_until(|| self.count_of(kind) >= n, max_wait).await
    }

    pub fn connection_count(&self) -> u32 {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Wait until a client has connected
    pub async fn wait_for_client(&self) -> bool {
        wait_until(|| self.connection_count() > 0, DEFAULT_TIMEOUT).await
    }

    /// Wait until a client connection has gone away
    pub async fn wait_for_disconnect(&self, max_wait: Duration) -> bool {
        wait_until(
            || self.state.disconnections.load(Ordering::SeqCst) > 0,
            max_wait,
        )
        .await
    }

    /// Send a text message to the most recent client
    pub async fn send(&self, text: &str) -> Result<()> {
        let tx = self
            .state
            .current
            .lock()
            .clone()
            .ok_or_else(|| anyhow!("no client connected"))?;
        let (done, wait) = oneshot::channel();
        tx.send(ServerCommand::Send(text.to_string(), done))
            .map_err(|_| anyhow!("client connection gone"))?;
        wait.await?
    }

    /// Send a JSON message to the most recent client
    pub async fn send_json(&self, message: Value) -> Result<()> {
        self.send(&message.to_string()).await
    }

    /// Close the most recent client connection from the server side
    pub async fn close_connection(&self) -> Result<()> {
        let tx = self
            .state
            .current
            .lock()
            .take()
            .ok_or_else(|| anyhow!("no client connected"))?;
        let (done, wait) = oneshot::channel();
        tx.send(ServerCommand::Close(done))
            .map_err(|_| anyhow!("client connection gone"))?;
        wait.await?;
        Ok(())
    }

    /// Stop the server explicitly (also happens on drop)
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for TestSignalingServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn serve_connection(
    state: Arc<ServerState>,
    sender: Box<dyn TransportSender>,
    mut receiver: Box<dyn TransportReceiver>,
    mut commands: mpsc::UnboundedReceiver<ServerCommand>,
) {
    let mut commands_open = true;
    loop {
        tokio::select! {
            event = receiver.recv() => match event {
                Some(TransportEvent::Text(text)) => match serde_json::from_str::<Value>(&text) {
                    Ok(value) => state.received.lock().push(value),
                    Err(e) => debug!("Test server got non-JSON text: {}", e),
                },
                Some(TransportEvent::Disconnected { .. }) | None => break,
                Some(_) => {}
            },
            command = commands.recv(), if commands_open => match command {
                Some(ServerCommand::Send(text, done)) => {
                    let result = sender.send(text).await.map_err(anyhow::Error::from);
                    let _ = done.send(result);
                }
                Some(ServerCommand::Close(done)) => {
                    let _ = sender.close(Duration::from_secs(2)).await;
                    let _ = done.send(());
                }
                // Superseded by a newer client; keep recording
                None => commands_open = false,
            },
        }
    }
    state.disconnections.fetch_add(1, Ordering::SeqCst);
    debug!("Test server connection ended");
}
