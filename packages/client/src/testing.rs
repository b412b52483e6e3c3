//! In-memory transport doubles.
//!
//! [`FakeConnector`] records every connection it opens and lets a test push
//! [`TransportEvent`]s through the sink the manager registered, exactly as a
//! real transport would.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use crate::{
    config::Credentials,
    realtime::{
        classifier::ErrorEvent,
        transport::{ConnectionState, Connector, EventSink, Transport, TransportEvent},
    },
    sync::lock,
};

/// Transport that records requests instead of performing them.
///
/// A connect request from an idle state reports the move to `Connecting`
/// synchronously, so tests see it without running a driver task.
#[derive(Default)]
pub struct FakeTransport {
    connects: AtomicUsize,
    subscribed: Mutex<Vec<String>>,
    unsubscribed: Mutex<Vec<String>>,
    state: Mutex<ConnectionState>,
    sink: Mutex<Option<EventSink>>,
}

impl FakeTransport {
    fn track(&self, event: &TransportEvent) {
        match event {
            TransportEvent::StateChange { current, .. } => *lock(&self.state) = *current,
            TransportEvent::Connected { .. } => *lock(&self.state) = ConnectionState::Connected,
            _ => {}
        }
    }

    /// Number of connect requests received
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Channels passed to `subscribe`, in call order
    pub fn subscribed(&self) -> Vec<String> {
        lock(&self.subscribed).clone()
    }

    /// Channels passed to `unsubscribe`, in call order
    pub fn unsubscribed(&self) -> Vec<String> {
        lock(&self.unsubscribed).clone()
    }
}

impl Transport for FakeTransport {
    fn connect(&self) {
        self.connects.fetch_add(1, Ordering::SeqCst);

        let previous = {
            let mut state = lock(&self.state);
            let previous = *state;
            if matches!(
                previous,
                ConnectionState::Connecting | ConnectionState::Connected
            ) {
                return;
            }
            *state = ConnectionState::Connecting;
            previous
        };

        let sink = lock(&self.sink).clone();
        if let Some(sink) = sink {
            sink(TransportEvent::StateChange {
                previous,
                current: ConnectionState::Connecting,
            });
        }
    }

    fn subscribe(&self, channel: &str) {
        lock(&self.subscribed).push(channel.to_string());
    }

    fn unsubscribe(&self, channel: &str) {
        lock(&self.unsubscribed).push(channel.to_string());
    }
}

/// Connector handing out a single recorded transport
pub struct FakeConnector {
    opened: Mutex<Vec<Credentials>>,
    sink: Mutex<Option<EventSink>>,
    recording: Arc<FakeTransport>,
    transport: Arc<dyn Transport>,
}

impl FakeConnector {
    /// Connector whose transport is a [`FakeTransport`]
    pub fn new() -> Arc<Self> {
        let recording = Arc::new(FakeTransport::default());
        Arc::new(Self {
            opened: Mutex::new(Vec::new()),
            sink: Mutex::new(None),
            transport: recording.clone(),
            recording,
        })
    }

    /// Connector returning the given transport from `open`
    pub fn with_transport(transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(Self {
            opened: Mutex::new(Vec::new()),
            sink: Mutex::new(None),
            recording: Arc::new(FakeTransport::default()),
            transport,
        })
    }

    /// Number of transports opened
    pub fn open_count(&self) -> usize {
        lock(&self.opened).len()
    }

    /// Credentials of every `open` call
    pub fn opened_with(&self) -> Vec<Credentials> {
        lock(&self.opened).clone()
    }

    /// The recording transport (unused when built with `with_transport`)
    pub fn transport(&self) -> Arc<FakeTransport> {
        self.recording.clone()
    }

    /// Deliver an event through the registered sink.
    ///
    /// # Returns
    ///
    /// `false` if no transport was opened yet
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.recording.track(&event);
        let sink = lock(&self.sink).clone();
        match sink {
            Some(sink) => {
                sink(event);
                true
            }
            None => false,
        }
    }

    pub fn emit_state(&self, previous: ConnectionState, current: ConnectionState) -> bool {
        self.emit(TransportEvent::StateChange { previous, current })
    }

    pub fn emit_connected(&self, socket_id: &str) -> bool {
        self.emit(TransportEvent::Connected {
            socket_id: socket_id.to_string(),
        })
    }

    pub fn emit_error(&self, code: Option<u16>, message: &str, occurred_at: i64) -> bool {
        self.emit(TransportEvent::Error(ErrorEvent::new(
            code,
            message,
            occurred_at,
        )))
    }

    pub fn emit_channel_event(&self, channel: &str, event: &str, data: serde_json::Value) -> bool {
        self.emit(TransportEvent::ChannelEvent {
            channel: channel.to_string(),
            event: event.to_string(),
            data,
        })
    }
}

impl Connector for FakeConnector {
    fn open(&self, credentials: &Credentials, events: EventSink) -> Arc<dyn Transport> {
        lock(&self.opened).push(credentials.clone());
        *lock(&self.recording.sink) = Some(events.clone());
        *lock(&self.sink) = Some(events);
        self.transport.clone()
    }
}
