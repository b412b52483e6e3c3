//! Collaborator boundary between the connection manager and the wire transport.
//!
//! A [`Connector`] opens a [`Transport`] and hands it an [`EventSink`]; the
//! transport reports everything it observes through that sink and never
//! changes state on request. Callers only ask it to connect, subscribe or
//! unsubscribe.

use std::{fmt, sync::Arc};

use crate::config::Credentials;

use super::classifier::ErrorEvent;

/// Connection state as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Unavailable,
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Unavailable => "unavailable",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Event emitted by the transport, in wire order
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    StateChange {
        previous: ConnectionState,
        current: ConnectionState,
    },
    /// Handshake completed
    Connected { socket_id: String },
    Error(ErrorEvent),
    SubscriptionSucceeded { channel: String },
    SubscriptionError {
        channel: String,
        status: Option<u16>,
        message: String,
    },
    /// Application event published on a channel
    ChannelEvent {
        channel: String,
        event: String,
        data: serde_json::Value,
    },
}

/// Callback through which a transport reports events
pub type EventSink = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// An open transport connection
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Request a connection attempt; a no-op while one is in progress or established
    fn connect(&self);

    /// Subscribe to a channel (re-subscribed automatically after reconnects)
    fn subscribe(&self, channel: &str);

    /// Unsubscribe from a channel
    fn unsubscribe(&self, channel: &str);
}

/// Factory for transport connections
pub trait Connector: Send + Sync {
    /// Create a transport for `credentials`; does not connect yet
    fn open(&self, credentials: &Credentials, events: EventSink) -> Arc<dyn Transport>;
}
