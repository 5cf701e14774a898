//! Data channels backed by webrtc-rs
//!
//! Wraps an `RTCDataChannel` the engine announced, forwarding its open,
//! message and close callbacks as [`DataChannelEvent`]s.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

use webrtc_rs::data_channel::{
    data_channel_message::DataChannelMessage, data_channel_state::RTCDataChannelState,
    RTCDataChannel,
};

use crate::data_channel::{DataChannel, DataChannelEvent};
use crate::error::{Result, TransportError};

/// Callback receiving the events of one channel
pub type DataChannelEventFn = Arc<dyn Fn(DataChannelEvent) + Send + Sync>;

/// A webrtc-rs data channel
pub struct RtcDataChannel {
    label: String,
    channel: Arc<RTCDataChannel>,
    closed: watch::Receiver<bool>,
}

impl RtcDataChannel {
    /// Take over the callbacks of `channel`
    ///
    /// If the channel is already open when attached, an `Open` event is
    /// raised right away.
    pub fn attach(channel: Arc<RTCDataChannel>, on_event: DataChannelEventFn) -> Arc<Self> {
        let label = channel.label().to_string();
        let (closed_tx, closed_rx) = watch::channel(false);
        let closed_tx = Arc::new(closed_tx);

        let on_message = on_event.clone();
        let label_for_message = label.clone();
        channel.on_message(Box::new(move |msg: DataChannelMessage| {
            on_message(DataChannelEvent::Message {
                label: label_for_message.clone(),
                data: msg.data,
            });
            Box::pin(async {})
        }));

        let on_open = on_event.clone();
        let label_for_open = label.clone();
        channel.on_open(Box::new(move || {
            info!("DataChannel '{}' opened", label_for_open);
            on_open(DataChannelEvent::Open {
                label: label_for_open.clone(),
            });
            Box::pin(async {})
        }));

        let on_close = on_event.clone();
        let label_for_close = label.clone();
        channel.on_close(Box::new(move || {
            debug!("DataChannel '{}' closed", label_for_close);
            let _ = closed_tx.send(true);
            on_close(DataChannelEvent::Closed {
                label: label_for_close.clone(),
            });
            Box::pin(async {})
        }));

        if channel.ready_state() == RTCDataChannelState::Open {
            on_event(DataChannelEvent::Open {
                label: label.clone(),
            });
        }

        Arc::new(Self {
            label,
            channel,
            closed: closed_rx,
        })
    }
}

#[async_trait]
impl DataChannel for RtcDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.channel.ready_state() == RTCDataChannelState::Open
    }

    async fn send(&self, data: Bytes) -> Result<()> {
        self.channel
            .send(&data)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.channel.ready_state() == RTCDataChannelState::Closed {
            return Ok(());
        }
        self.channel
            .close()
            .await
            .map_err(|e| TransportError::Other(e.to_string()))?;

        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|c| *c).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use webrtc_rs::api::APIBuilder;
    use webrtc_rs::peer_connection::configuration::RTCConfiguration;

    #[tokio::test]
    async fn test_attach_unopened_channel() {
        let api = APIBuilder::new().build();
        let pc = api
            .new_peer_connection(RTCConfiguration::default())
            .await
            .unwrap();
        let raw = pc.create_data_channel("#chat", None).await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        let channel = RtcDataChannel::attach(
            raw,
            Arc::new(move |event| record.lock().push(event)),
        );

        assert_eq!(channel.label(), "#chat");
        assert!(!channel.is_open());
        assert!(channel.send(Bytes::from_static(b"x")).await.is_err());
        // Not open yet, so nothing was announced
        assert!(seen.lock().is_empty());

        pc.close().await.unwrap();
    }
}
