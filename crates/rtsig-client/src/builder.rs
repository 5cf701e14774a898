//! Session builder

use rtsig_core::{DataChannelDecl, Role};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{MediaConfig, SignalingConfig};
use crate::error::{ClientError, Result};
use crate::peer::PeerConnectionFactory;
use crate::Signaling;

/// Builder for [`Signaling`]
pub struct SignalingBuilder {
    config: SignalingConfig,
    factory: Option<Arc<dyn PeerConnectionFactory>>,
}

impl SignalingBuilder {
    /// Create a new builder for one signaling URL
    pub fn new(url: &str) -> Self {
        Self {
            config: SignalingConfig {
                signaling_urls: vec![url.to_string()],
                ..Default::default()
            },
            factory: None,
        }
    }

    /// Start from an existing configuration
    pub fn from_config(config: SignalingConfig) -> Self {
        Self {
            config,
            factory: None,
        }
    }

    /// Add another candidate URL; all candidates are dialed at once
    pub fn url(mut self, url: &str) -> Self {
        self.config.signaling_urls.push(url.to_string());
        self
    }

    pub fn channel_id(mut self, channel_id: &str) -> Self {
        self.config.channel_id = channel_id.to_string();
        self
    }

    pub fn role(mut self, role: Role) -> Self {
        self.config.role = role;
        self
    }

    pub fn client_id(mut self, client_id: &str) -> Self {
        self.config.client_id = Some(client_id.to_string());
        self
    }

    pub fn bundle_id(mut self, bundle_id: &str) -> Self {
        self.config.bundle_id = Some(bundle_id.to_string());
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.config.metadata = Some(metadata);
        self
    }

    pub fn signaling_notify_metadata(mut self, metadata: Value) -> Self {
        self.config.signaling_notify_metadata = Some(metadata);
        self
    }

    pub fn video(mut self, video: MediaConfig) -> Self {
        self.config.video = video;
        self
    }

    pub fn audio(mut self, audio: MediaConfig) -> Self {
        self.config.audio = audio;
        self
    }

    pub fn multistream(mut self, enabled: bool) -> Self {
        self.config.multistream = Some(enabled);
        self
    }

    /// Enable spotlight with the number of focused participants (0 leaves it to the server)
    pub fn spotlight(mut self, number: u32) -> Self {
        self.config.spotlight = Some(true);
        self.config.spotlight_number = number;
        self
    }

    pub fn simulcast(mut self, enabled: bool) -> Self {
        self.config.simulcast = enabled;
        self
    }

    pub fn simulcast_rid(mut self, rid: &str) -> Self {
        self.config.simulcast_rid = Some(rid.to_string());
        self
    }

    pub fn data_channel_signaling(mut self, enabled: bool) -> Self {
        self.config.data_channel_signaling = Some(enabled);
        self
    }

    pub fn ignore_disconnect_websocket(mut self, enabled: bool) -> Self {
        self.config.ignore_disconnect_websocket = Some(enabled);
        self
    }

    /// Declare a data channel in the connect message
    pub fn data_channel(mut self, channel: DataChannelDecl) -> Self {
        self.config.data_channels.push(channel);
        self
    }

    pub fn disconnect_wait_timeout(mut self, timeout: Duration) -> Self {
        self.config.disconnect_wait_timeout = timeout;
        self
    }

    pub fn websocket_close_timeout(mut self, timeout: Duration) -> Self {
        self.config.websocket_close_timeout = timeout;
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    /// Skip TLS certificate verification
    pub fn insecure(mut self, insecure: bool) -> Self {
        self.config.insecure = insecure;
        self
    }

    /// Set the peer connection factory (required)
    pub fn factory(mut self, factory: Arc<dyn PeerConnectionFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Build without connecting
    pub fn build(self) -> Result<Signaling> {
        let factory = self.factory.ok_or_else(|| {
            ClientError::InvalidParameter("no peer connection factory".to_string())
        })?;
        Ok(Signaling::new(self.config, factory))
    }

    /// Build and start connecting
    pub fn connect(self) -> Result<Signaling> {
        let mut signaling = self.build()?;
        signaling.connect()?;
        Ok(signaling)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_collects_config() {
        let builder = SignalingBuilder::new("wss://a.example/signaling")
            .url("wss://b.example/signaling")
            .channel_id("room")
            .role(Role::Recvonly)
            .spotlight(2)
            .simulcast(true)
            .connection_timeout(Duration::from_secs(5));

        let config = &builder.config;
        assert_eq!(config.signaling_urls.len(), 2);
        assert_eq!(config.channel_id, "room");
        assert_eq!(config.role, Role::Recvonly);
        assert_eq!(config.spotlight, Some(true));
        assert_eq!(config.spotlight_number, 2);
        assert!(config.simulcast);
        assert_eq!(config.connection_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_build_requires_factory() {
        let result = SignalingBuilder::new("wss://a.example/signaling")
            .channel_id("room")
            .build();
        assert!(matches!(result, Err(ClientError::InvalidParameter(_))));
    }
}
