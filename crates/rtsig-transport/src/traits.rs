//! Transport trait definitions

use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::Result;

/// Events that can occur on a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Connection established
    Connected,
    /// Connection closed by the remote or by a failure
    Disconnected { reason: Option<String> },
    /// One text message received
    Text(String),
    /// Error occurred (always followed by `Disconnected`)
    Error(String),
}

/// How a bounded close handshake ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The peer answered the close frame (or the stream ended) in time
    Graceful,
    /// The timer fired first; the connection was torn down locally
    TimedOut,
    /// Close had already run, or there was nothing to close
    AlreadyClosed,
}

/// Trait for sending text messages
#[async_trait]
pub trait TransportSender: Send + Sync {
    /// Queue one text message; queued writes never interleave
    async fn send(&self, text: String) -> Result<()>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Run the close handshake, bounded by `timeout`
    ///
    /// Only the first call performs the handshake; later calls return
    /// [`CloseOutcome::AlreadyClosed`].
    async fn close(&self, timeout: Duration) -> Result<CloseOutcome>;
}

/// Trait for receiving events
#[async_trait]
pub trait TransportReceiver: Send {
    /// Receive the next event
    async fn recv(&mut self) -> Option<TransportEvent>;
}

/// Main transport trait
#[async_trait]
pub trait Transport: Send + Sync {
    /// The sender type for this transport
    type Sender: TransportSender;
    /// The receiver type for this transport
    type Receiver: TransportReceiver;

    /// Connect to a remote endpoint
    async fn connect(&self, url: &str) -> Result<(Self::Sender, Self::Receiver)>;
}

/// Trait for transport servers (listeners)
#[async_trait]
pub trait TransportServer: Send + Sync {
    /// The sender type for accepted connections
    type Sender: TransportSender;
    /// The receiver type for accepted connections
    type Receiver: TransportReceiver;

    /// Accept a new connection
    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, SocketAddr)>;

    /// Get the local address
    fn local_addr(&self) -> Result<SocketAddr>;
}
