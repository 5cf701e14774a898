//! Observer that keeps every event it is given

use bytes::Bytes;
use rtsig_client::{SessionEvent, Signaling, SignalingObserver};
use rtsig_core::ErrorCode;
use std::time::{Duration, Instant};

use crate::DEFAULT_CHECK_INTERVAL;

/// Records dispatched events as [`SessionEvent`]s
#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub events: Vec<SessionEvent>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatch until an event matches, or give up after `max_wait`
    pub async fn wait_for<F>(&mut self, signaling: &Signaling, matches: F, max_wait: Duration) -> bool
    where
        F: Fn(&SessionEvent) -> bool,
    {
        let start = Instant::now();
        loop {
            signaling.dispatch_events(self);
            if self.events.iter().any(&matches) {
                return true;
            }
            if start.elapsed() >= max_wait {
                return false;
            }
            tokio::time::sleep(DEFAULT_CHECK_INTERVAL).await;
        }
    }

    /// Dispatch until the session reports its disconnect
    pub async fn wait_for_disconnect(
        &mut self,
        signaling: &Signaling,
        max_wait: Duration,
    ) -> Option<(ErrorCode, String)> {
        self.wait_for(
            signaling,
            |e| matches!(e, SessionEvent::Disconnect { .. }),
            max_wait,
        )
        .await;
        self.disconnects().into_iter().next()
    }

    pub fn disconnects(&self) -> Vec<(ErrorCode, String)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Disconnect { code, reason } => Some((*code, reason.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, matches: impl Fn(&SessionEvent) -> bool) -> usize {
        self.events.iter().filter(|e| matches(e)).count()
    }
}

impl SignalingObserver for RecordingObserver {
    fn on_offer(&mut self, sdp: &str) {
        self.events.push(SessionEvent::Offer {
            sdp: sdp.to_string(),
        });
    }

    fn on_disconnect(&mut self, code: ErrorCode, reason: &str) {
        self.events.push(SessionEvent::Disconnect {
            code,
            reason: reason.to_string(),
        });
    }

    fn on_notify(&mut self, text: &str) {
        self.events.push(SessionEvent::Notify(text.to_string()));
    }

    fn on_push(&mut self, text: &str) {
        self.events.push(SessionEvent::Push(text.to_string()));
    }

    fn on_message(&mut self, label: &str, data: &[u8]) {
        self.events.push(SessionEvent::Message {
            label: label.to_string(),
            data: Bytes::copy_from_slice(data),
        });
    }

    fn on_track_added(&mut self, track_id: &str, connection_id: &str) {
        self.events.push(SessionEvent::TrackAdded {
            track_id: track_id.to_string(),
            connection_id: connection_id.to_string(),
        });
    }

    fn on_track_removed(&mut self, track_id: &str, connection_id: &str) {
        self.events.push(SessionEvent::TrackRemoved {
            track_id: track_id.to_string(),
            connection_id: connection_id.to_string(),
        });
    }

    fn on_data_channel_open(&mut self, label: &str) {
        self.events.push(SessionEvent::DataChannelOpen {
            label: label.to_string(),
        });
    }
}
