//! Session events and the queue the application drains them from
//!
//! The session task appends, the application calls
//! [`EventQueue::dispatch`] from wherever it wants callbacks to run.

use bytes::Bytes;
use parking_lot::Mutex;
use rtsig_core::ErrorCode;
use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;
use tracing::debug;

/// Something the application should hear about
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The remote offer was applied
    Offer { sdp: String },
    /// The session ended; always the last event of a session
    Disconnect { code: ErrorCode, reason: String },
    /// A `notify` message, verbatim
    Notify(String),
    /// A `push` message, verbatim
    Push(String),
    /// Payload received on an application data channel
    Message { label: String, data: Bytes },
    TrackAdded {
        track_id: String,
        connection_id: String,
    },
    TrackRemoved {
        track_id: String,
        connection_id: String,
    },
    /// An application data channel opened
    DataChannelOpen { label: String },
}

/// Receives session events during [`EventQueue::dispatch`]
///
/// Every method has an empty default so implementors only pick what they need.
#[allow(unused_variables)]
pub trait SignalingObserver {
    fn on_offer(&mut self, sdp: &str) {}
    fn on_disconnect(&mut self, code: ErrorCode, reason: &str) {}
    fn on_notify(&mut self, text: &str) {}
    fn on_push(&mut self, text: &str) {}
    fn on_message(&mut self, label: &str, data: &[u8]) {}
    fn on_track_added(&mut self, track_id: &str, connection_id: &str) {}
    fn on_track_removed(&mut self, track_id: &str, connection_id: &str) {}
    fn on_data_channel_open(&mut self, label: &str) {}
}

impl SessionEvent {
    /// Invoke the matching observer method
    pub fn deliver(&self, observer: &mut dyn SignalingObserver) {
        match self {
            SessionEvent::Offer { sdp } => observer.on_offer(sdp),
            SessionEvent::Disconnect { code, reason } => observer.on_disconnect(*code, reason),
            SessionEvent::Notify(text) => observer.on_notify(text),
            SessionEvent::Push(text) => observer.on_push(text),
            SessionEvent::Message { label, data } => observer.on_message(label, data),
            SessionEvent::TrackAdded {
                track_id,
                connection_id,
            } => observer.on_track_added(track_id, connection_id),
            SessionEvent::TrackRemoved {
                track_id,
                connection_id,
            } => observer.on_track_removed(track_id, connection_id),
            SessionEvent::DataChannelOpen { label } => observer.on_data_channel_open(label),
        }
    }
}

#[derive(Default)]
struct QueueState {
    events: VecDeque<SessionEvent>,
    sealed: bool,
}

/// FIFO of pending session events, safe to share across threads
///
/// The queue seals itself after a `Disconnect` event; anything pushed
/// afterwards is dropped.
#[derive(Clone, Default)]
pub struct EventQueue {
    inner: Arc<Mutex<QueueState>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event; returns false if the queue is sealed
    pub fn push(&self, event: SessionEvent) -> bool {
        let mut state = self.inner.lock();
        if state.sealed {
            debug!("Event queue sealed, dropping {:?}", event);
            return false;
        }
        if matches!(event, SessionEvent::Disconnect { .. }) {
            state.sealed = true;
        }
        state.events.push_back(event);
        true
    }

    /// Drop everything pushed from now on
    pub fn seal(&self) {
        self.inner.lock().sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.lock().sealed
    }

    /// Take every queued event in order
    pub fn drain(&self) -> Vec<SessionEvent> {
        let mut state = self.inner.lock();
        mem::take(&mut state.events).into()
    }

    /// Deliver every queued event to `observer`, oldest first
    ///
    /// The lock is released before the observer runs. Returns the number of
    /// events delivered.
    pub fn dispatch(&self, observer: &mut dyn SignalingObserver) -> usize {
        let events = self.drain();
        for event in &events {
            event.deliver(observer);
        }
        events.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().events.is_empty()
    }
}
