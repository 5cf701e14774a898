//! Data channel abstraction and the per-session set of channels

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::Result;
use crate::traits::CloseOutcome;

/// Events raised by a data channel
#[derive(Debug, Clone, PartialEq)]
pub enum DataChannelEvent {
    Open { label: String },
    Message { label: String, data: Bytes },
    Closed { label: String },
}

impl DataChannelEvent {
    pub fn label(&self) -> &str {
        match self {
            DataChannelEvent::Open { label }
            | DataChannelEvent::Message { label, .. }
            | DataChannelEvent::Closed { label } => label,
        }
    }
}

/// One labeled, reliable, ordered data channel
#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;

    fn is_open(&self) -> bool;

    async fn send(&self, data: Bytes) -> Result<()>;

    /// Close the channel; resolves once the channel reports closed
    async fn close(&self) -> Result<()>;
}

/// Channels of one session, keyed by label
#[derive(Default)]
pub struct DataChannelSet {
    channels: HashMap<String, Arc<dyn DataChannel>>,
}

impl DataChannelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel, replacing any previous one with the same label
    pub fn insert(&mut self, channel: Arc<dyn DataChannel>) {
        let label = channel.label().to_string();
        if self.channels.insert(label.clone(), channel).is_some() {
            warn!("Replacing data channel {}", label);
        }
    }

    pub fn remove(&mut self, label: &str) -> Option<Arc<dyn DataChannel>> {
        self.channels.remove(label)
    }

    /// False for unknown labels
    pub fn is_open(&self, label: &str) -> bool {
        self.channels
            .get(label)
            .map(|c| c.is_open())
            .unwrap_or(false)
    }

    /// Send on `label`; `Ok(false)` when the channel is unknown or not open
    pub async fn send(&self, label: &str, data: Bytes) -> Result<bool> {
        match self.channels.get(label) {
            Some(channel) if channel.is_open() => {
                channel.send(data).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Send an optional farewell, then close every channel
    ///
    /// All channels close concurrently and the whole step is bounded by
    /// `timeout`. The set is emptied either way.
    pub async fn close(&mut self, farewell: Option<(&str, Bytes)>, timeout: Duration) -> CloseOutcome {
        if self.channels.is_empty() {
            return CloseOutcome::AlreadyClosed;
        }
        let channels: Vec<_> = self.channels.drain().map(|(_, c)| c).collect();

        let shutdown = async {
            if let Some((label, data)) = farewell {
                if let Some(channel) = channels.iter().find(|c| c.label() == label) {
                    if channel.is_open() {
                        if let Err(e) = channel.send(data).await {
                            warn!("Farewell on {} failed: {}", label, e);
                        }
                    }
                }
            }
            let results = join_all(channels.iter().map(|c| c.close())).await;
            for (channel, result) in channels.iter().zip(results) {
                if let Err(e) = result {
                    warn!("Closing data channel {} failed: {}", channel.label(), e);
                }
            }
        };

        match tokio::time::timeout(timeout, shutdown).await {
            Ok(()) => {
                debug!("Data channels closed");
                CloseOutcome::Graceful
            }
            Err(_) => {
                warn!("Data channel close timed out after {:?}", timeout);
                CloseOutcome::TimedOut
            }
        }
    }
}
