//! Session configuration

use rtsig_core::{ConnectMessage, DataChannelDecl, MediaOption, MediaSpec, Role};
use rtsig_transport::validate_url;
use serde_json::Value;
use std::time::Duration;

use crate::error::{ClientError, Result};

/// Name reported in the `sora_client` field of the connect message
pub const CLIENT_NAME: &str = concat!("rtsig ", env!("CARGO_PKG_VERSION"));

/// Media settings for one kind (audio or video)
#[derive(Debug, Clone, PartialEq)]
pub struct MediaConfig {
    pub enabled: bool,
    pub codec_type: Option<String>,
    pub bit_rate: Option<u32>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            codec_type: None,
            bit_rate: None,
        }
    }
}

impl MediaConfig {
    fn to_option(&self) -> MediaOption {
        if !self.enabled {
            return MediaOption::Flag(false);
        }
        if self.codec_type.is_none() && self.bit_rate.is_none() {
            return MediaOption::Flag(true);
        }
        MediaOption::Enabled(MediaSpec {
            codec_type: self.codec_type.clone(),
            bit_rate: self.bit_rate,
        })
    }
}

/// Everything a session needs to connect
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// Candidate signaling URLs; all are dialed and the first to answer wins
    pub signaling_urls: Vec<String>,
    pub channel_id: String,
    pub client_id: Option<String>,
    pub bundle_id: Option<String>,
    pub metadata: Option<Value>,
    pub signaling_notify_metadata: Option<Value>,
    pub role: Role,
    pub video: MediaConfig,
    pub audio: MediaConfig,
    pub multistream: Option<bool>,
    pub spotlight: Option<bool>,
    pub spotlight_number: u32,
    pub spotlight_focus_rid: Option<String>,
    pub spotlight_unfocus_rid: Option<String>,
    pub simulcast: bool,
    pub simulcast_rid: Option<String>,
    pub data_channel_signaling: Option<bool>,
    pub ignore_disconnect_websocket: Option<bool>,
    pub data_channels: Vec<DataChannelDecl>,
    /// Bound on closing the data channels, and separately the peer
    /// connection, during teardown
    pub disconnect_wait_timeout: Duration,
    /// Bound on queueing the disconnect plus the WebSocket close handshake
    pub websocket_close_timeout: Duration,
    /// Time allowed from connect until the peer connection is up
    pub connection_timeout: Duration,
    /// Skip TLS certificate verification
    pub insecure: bool,
    pub sora_client: String,
    pub libwebrtc: Option<String>,
    pub environment: String,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            signaling_urls: Vec::new(),
            channel_id: String::new(),
            client_id: None,
            bundle_id: None,
            metadata: None,
            signaling_notify_metadata: None,
            role: Role::default(),
            video: MediaConfig::default(),
            audio: MediaConfig::default(),
            multistream: None,
            spotlight: None,
            spotlight_number: 0,
            spotlight_focus_rid: None,
            spotlight_unfocus_rid: None,
            simulcast: false,
            simulcast_rid: None,
            data_channel_signaling: None,
            ignore_disconnect_websocket: None,
            data_channels: Vec::new(),
            disconnect_wait_timeout: Duration::from_secs(5),
            websocket_close_timeout: Duration::from_secs(3),
            connection_timeout: Duration::from_secs(30),
            insecure: false,
            sora_client: CLIENT_NAME.to_string(),
            libwebrtc: None,
            environment: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
        }
    }
}

impl SignalingConfig {
    /// Check the configuration before any connection is attempted
    pub fn validate(&self) -> Result<()> {
        if self.signaling_urls.is_empty() {
            return Err(ClientError::InvalidParameter(
                "no signaling url".to_string(),
            ));
        }
        for url in &self.signaling_urls {
            validate_url(url).map_err(|e| {
                ClientError::InvalidParameter(format!("signaling url {:?}: {}", url, e))
            })?;
        }
        if self.channel_id.is_empty() {
            return Err(ClientError::InvalidParameter(
                "empty channel id".to_string(),
            ));
        }
        if self.data_channels.iter().any(|dc| dc.label.is_empty()) {
            return Err(ClientError::InvalidParameter(
                "data channel without label".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the `connect` message announcing this configuration
    pub fn connect_message(&self) -> ConnectMessage {
        let spotlight_number = match self.spotlight {
            Some(true) if self.spotlight_number > 0 => Some(self.spotlight_number),
            _ => None,
        };

        ConnectMessage {
            role: self.role,
            channel_id: self.channel_id.clone(),
            client_id: self.client_id.clone(),
            bundle_id: self.bundle_id.clone(),
            metadata: self.metadata.clone(),
            signaling_notify_metadata: self.signaling_notify_metadata.clone(),
            multistream: self.multistream,
            spotlight: self.spotlight,
            spotlight_number,
            spotlight_focus_rid: self.spotlight_focus_rid.clone(),
            spotlight_unfocus_rid: self.spotlight_unfocus_rid.clone(),
            simulcast: self.simulcast.then_some(true),
            simulcast_rid: self.simulcast_rid.clone(),
            video: self.video.to_option(),
            audio: self.audio.to_option(),
            data_channel_signaling: self.data_channel_signaling,
            ignore_disconnect_websocket: self.ignore_disconnect_websocket,
            data_channels: self.data_channels.clone(),
            sora_client: self.sora_client.clone(),
            libwebrtc: self.libwebrtc.clone(),
            environment: self.environment.clone(),
        }
    }
}
