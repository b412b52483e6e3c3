//! Owner of the single shared realtime connection.
//!
//! [`ConnectionManager`] is an explicitly constructed service: the
//! application builds one at its composition root and passes it to whoever
//! needs the connection. It creates at most one [`ConnectionHandle`] for its
//! lifetime, keeps the handle's state in step with the transport's event
//! stream, and decides which transport errors the user gets to see.

use std::sync::{
    Arc, Mutex, Weak,
    atomic::{AtomicU64, Ordering},
};

use noren_shared::time::Clock;
use tokio::sync::watch;

use crate::{
    config::{Credentials, RealtimeConfig},
    error::ClientError,
    sync::lock,
};

use super::{
    classifier::{ErrorClass, ErrorEvent, classify},
    environment::{ActiveListener, EnvironmentWatcher},
    suppression::{SuppressionDecision, SuppressionWindow},
    transport::{ConnectionState, Connector, EventSink, Transport, TransportEvent},
};

/// A persistent transport error that made it through the debounce gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfacedError {
    pub code: Option<u16>,
    pub message: String,
    pub occurred_at: i64,
}

impl From<&ErrorEvent> for SurfacedError {
    fn from(event: &ErrorEvent) -> Self {
        Self {
            code: event.effective_code(),
            message: event.message.clone(),
            occurred_at: event.occurred_at,
        }
    }
}

type StateObserver = Arc<dyn Fn(ConnectionState, ConnectionState) + Send + Sync>;
type ErrorObserver = Arc<dyn Fn(&SurfacedError) + Send + Sync>;
pub(crate) type ChannelHandler = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;

/// Identifier of a channel event binding on a handle
pub(crate) type BindingId = u64;

struct ChannelBinding {
    id: BindingId,
    channel: String,
    event: String,
    handler: ChannelHandler,
}

struct HandleState {
    state: ConnectionState,
    socket_id: Option<String>,
    reconnecting: bool,
    transient_errors: u64,
    window: SuppressionWindow,
    bindings: Vec<ChannelBinding>,
    confirmed_channels: Vec<String>,
}

struct HandleInner {
    transport: Arc<dyn Transport>,
    credentials: Credentials,
    created_at: i64,
    state: Mutex<HandleState>,
    state_tx: watch::Sender<ConnectionState>,
    next_binding_id: AtomicU64,
}

/// Shared handle to the process-wide transport connection.
///
/// Cloning is cheap; every clone refers to the same connection. Only
/// [`ConnectionManager`] constructs handles.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("host", &self.inner.credentials.host)
            .field("state", &self.state())
            .field("socket_id", &self.socket_id())
            .field("created_at", &self.inner.created_at)
            .finish()
    }
}

impl ConnectionHandle {
    pub fn state(&self) -> ConnectionState {
        lock(&self.inner.state).state
    }

    /// Session identifier; present only while connected
    pub fn socket_id(&self) -> Option<String> {
        lock(&self.inner.state).socket_id.clone()
    }

    /// Unix timestamp (milliseconds) when the handle was created
    pub fn created_at(&self) -> i64 {
        self.inner.created_at
    }

    pub fn credentials(&self) -> &Credentials {
        &self.inner.credentials
    }

    /// Watch channel that follows every state transition
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Number of transient errors seen so far
    pub fn transient_error_count(&self) -> u64 {
        lock(&self.inner.state).transient_errors
    }

    /// Whether a transient fault is waiting for the transport to recover
    pub fn is_reconnecting(&self) -> bool {
        lock(&self.inner.state).reconnecting
    }

    /// Whether the server confirmed the subscription to `channel`
    pub fn is_subscription_confirmed(&self, channel: &str) -> bool {
        lock(&self.inner.state)
            .confirmed_channels
            .iter()
            .any(|c| c == channel)
    }

    /// Number of handlers bound on `channel`
    pub fn binding_count(&self, channel: &str) -> usize {
        lock(&self.inner.state)
            .bindings
            .iter()
            .filter(|b| b.channel == channel)
            .count()
    }

    /// Whether two handles refer to the same underlying connection
    pub fn same_connection(&self, other: &ConnectionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Ask the transport for a connection attempt
    pub fn request_reconnect(&self) {
        self.inner.transport.connect();
    }

    pub(crate) fn bind_channel(
        &self,
        channel: &str,
        event: &str,
        handler: ChannelHandler,
    ) -> BindingId {
        let id = self.inner.next_binding_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.state).bindings.push(ChannelBinding {
            id,
            channel: channel.to_string(),
            event: event.to_string(),
            handler,
        });
        id
    }

    /// # Returns
    ///
    /// `true` if the binding existed
    pub(crate) fn unbind_channel(&self, id: BindingId) -> bool {
        let mut state = lock(&self.inner.state);
        let before = state.bindings.len();
        state.bindings.retain(|b| b.id != id);
        state.bindings.len() != before
    }

    pub(crate) fn subscribe_channel(&self, channel: &str) {
        self.inner.transport.subscribe(channel);
    }

    pub(crate) fn unsubscribe_channel(&self, channel: &str) {
        lock(&self.inner.state)
            .confirmed_channels
            .retain(|c| c != channel);
        self.inner.transport.unsubscribe(channel);
    }

    /// Record a state transition, returning `false` if nothing changed
    fn transition(&self, current: ConnectionState) -> bool {
        let changed = {
            let mut state = lock(&self.inner.state);
            let changed = state.state != current;
            state.state = current;
            if current != ConnectionState::Connected {
                state.socket_id = None;
            }
            if matches!(
                current,
                ConnectionState::Disconnected
                    | ConnectionState::Unavailable
                    | ConnectionState::Failed
            ) {
                state.confirmed_channels.clear();
            }
            changed
        };
        self.inner.state_tx.send_replace(current);
        changed
    }
}

#[derive(Default)]
struct Observers {
    state: Option<StateObserver>,
    error: Option<ErrorObserver>,
}

struct ManagerInner {
    connector: Arc<dyn Connector>,
    environment: EnvironmentWatcher,
    clock: Arc<dyn Clock>,
    handle: Mutex<Option<ConnectionHandle>>,
    observers: Mutex<Observers>,
    /// Environment observer; `None` once cleaned up
    active_listener: Mutex<Option<ActiveListener>>,
}

/// Creates and supervises the shared realtime connection
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    /// Create a manager and register its environment observer
    pub fn new(
        connector: Arc<dyn Connector>,
        environment: EnvironmentWatcher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let manager = Self {
            inner: Arc::new(ManagerInner {
                connector,
                environment,
                clock,
                handle: Mutex::new(None),
                observers: Mutex::new(Observers::default()),
                active_listener: Mutex::new(None),
            }),
        };
        manager.attach_listeners();
        manager
    }

    pub fn environment(&self) -> &EnvironmentWatcher {
        &self.inner.environment
    }

    /// Register the state observer, replacing any previous one
    pub fn on_state_change<F>(&self, observer: F)
    where
        F: Fn(ConnectionState, ConnectionState) + Send + Sync + 'static,
    {
        lock(&self.inner.observers).state = Some(Arc::new(observer));
    }

    /// Register the user-visible error observer, replacing any previous one
    pub fn on_error<F>(&self, observer: F)
    where
        F: Fn(&SurfacedError) + Send + Sync + 'static,
    {
        lock(&self.inner.observers).error = Some(Arc::new(observer));
    }

    /// The existing connection, if one was created
    pub fn connection(&self) -> Option<ConnectionHandle> {
        lock(&self.inner.handle).clone()
    }

    /// Current connection state (`Disconnected` before any connection exists)
    pub fn state(&self) -> ConnectionState {
        self.connection()
            .map(|handle| handle.state())
            .unwrap_or_default()
    }

    /// Return the shared connection, creating it and requesting a connect on first use.
    ///
    /// # Errors
    ///
    /// `ClientError::Configuration` if host or key is missing; no connection
    /// is created in that case
    pub fn get_or_create_connection(
        &self,
        config: &RealtimeConfig,
    ) -> Result<ConnectionHandle, ClientError> {
        self.attach_listeners();

        let handle = {
            let mut slot = lock(&self.inner.handle);
            if let Some(existing) = slot.as_ref() {
                return Ok(existing.clone());
            }

            let credentials = match config.credentials() {
                Ok(credentials) => credentials,
                Err(e) => {
                    tracing::error!("Realtime delivery unavailable: {}", e);
                    return Err(e);
                }
            };

            tracing::info!(
                "Creating realtime connection to {}:{} (app {})",
                credentials.host,
                credentials.port,
                credentials.app_id
            );
            let handle = self.create_handle(credentials);
            *slot = Some(handle.clone());
            handle
        };

        // Outside the slot lock: the transport may report back immediately
        handle.request_reconnect();
        tracing::debug!("Connect requested");
        Ok(handle)
    }

    /// Release the listeners registered by this manager.
    ///
    /// The connection itself stays open. Calling this again is a no-op; a
    /// later [`get_or_create_connection`](Self::get_or_create_connection)
    /// re-attaches the listeners to the same connection.
    pub fn cleanup(&self) {
        let listener = lock(&self.inner.active_listener).take();
        match listener {
            Some(listener) => {
                listener.unsubscribe();
                tracing::debug!("Connection manager listeners released");
            }
            None => tracing::debug!("Connection manager already cleaned up"),
        }
    }

    /// Whether the manager's listeners are attached
    pub fn is_attached(&self) -> bool {
        lock(&self.inner.active_listener).is_some()
    }

    fn attach_listeners(&self) {
        let mut slot = lock(&self.inner.active_listener);
        if slot.is_some() {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        *slot = Some(self.inner.environment.on_became_active(move |_| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let Some(handle) = lock(&inner.handle).clone() else {
                return;
            };
            let state = handle.state();
            if state != ConnectionState::Connected {
                tracing::info!("Client active again - reconnecting (state: {})", state);
                handle.request_reconnect();
            }
        }));
    }

    fn create_handle(&self, credentials: Credentials) -> ConnectionHandle {
        let manager: Weak<ManagerInner> = Arc::downgrade(&self.inner);
        let created_at = self.inner.clock.now_millis();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        let inner = Arc::new_cyclic(|weak_handle: &Weak<HandleInner>| {
            let weak_handle = weak_handle.clone();
            let sink: EventSink = Arc::new(move |event| {
                match (manager.upgrade(), weak_handle.upgrade()) {
                    (Some(manager), Some(handle)) => {
                        manager.dispatch(&ConnectionHandle { inner: handle }, event)
                    }
                    _ => tracing::debug!("Dropping transport event for a released connection"),
                }
            });

            HandleInner {
                transport: self.inner.connector.open(&credentials, sink),
                credentials,
                created_at,
                state: Mutex::new(HandleState {
                    state: ConnectionState::Disconnected,
                    socket_id: None,
                    reconnecting: false,
                    transient_errors: 0,
                    window: SuppressionWindow::default(),
                    bindings: Vec::new(),
                    confirmed_channels: Vec::new(),
                }),
                state_tx,
                next_binding_id: AtomicU64::new(0),
            }
        });

        ConnectionHandle { inner }
    }
}

impl ManagerInner {
    fn attached(&self) -> bool {
        lock(&self.active_listener).is_some()
    }

    fn notify_state(&self, previous: ConnectionState, current: ConnectionState) {
        if !self.attached() {
            return;
        }
        let observer = lock(&self.observers).state.clone();
        if let Some(observer) = observer {
            observer(previous, current);
        }
    }

    fn dispatch(&self, handle: &ConnectionHandle, event: TransportEvent) {
        match event {
            TransportEvent::StateChange { previous, current } => {
                tracing::info!("Connection state: {} -> {}", previous, current);
                if handle.transition(current) {
                    self.notify_state(previous, current);
                }
            }
            TransportEvent::Connected { socket_id } => {
                let previous = handle.state();
                let was_reconnecting = {
                    let mut state = lock(&handle.inner.state);
                    let was_reconnecting = state.reconnecting;
                    state.reconnecting = false;
                    state.window.reset();
                    was_reconnecting
                };
                if handle.transition(ConnectionState::Connected) {
                    self.notify_state(previous, ConnectionState::Connected);
                }
                lock(&handle.inner.state).socket_id = Some(socket_id.clone());

                if was_reconnecting {
                    tracing::info!("Reconnected successfully! Socket ID: {}", socket_id);
                } else {
                    tracing::info!("Connected! Socket ID: {}", socket_id);
                }
            }
            TransportEvent::Error(error) => self.on_error(handle, error),
            TransportEvent::SubscriptionSucceeded { channel } => {
                let mut state = lock(&handle.inner.state);
                if !state.confirmed_channels.contains(&channel) {
                    state.confirmed_channels.push(channel.clone());
                }
                tracing::info!("Subscribed to channel '{}'", channel);
            }
            TransportEvent::SubscriptionError {
                channel,
                status,
                message,
            } => {
                tracing::warn!(
                    "Subscription to channel '{}' failed (status {:?}): {}",
                    channel,
                    status,
                    message
                );
            }
            TransportEvent::ChannelEvent {
                channel,
                event,
                data,
            } => {
                let handlers: Vec<ChannelHandler> = lock(&handle.inner.state)
                    .bindings
                    .iter()
                    .filter(|b| b.channel == channel && b.event == event)
                    .map(|b| b.handler.clone())
                    .collect();

                if handlers.is_empty() {
                    tracing::debug!("No handler for '{}' on channel '{}'", event, channel);
                }
                for handler in handlers {
                    handler(&data);
                }
            }
        }
    }

    fn on_error(&self, handle: &ConnectionHandle, error: ErrorEvent) {
        match classify(&error) {
            ErrorClass::Transient => {
                {
                    let mut state = lock(&handle.inner.state);
                    state.transient_errors += 1;
                    state.reconnecting = true;
                }
                tracing::warn!(
                    "Transient connection error ({:?}): {} - waiting for automatic reconnection",
                    error.effective_code(),
                    error.message
                );
            }
            ErrorClass::Persistent => {
                if !self.attached() {
                    tracing::debug!("Persistent error after cleanup: {}", error.message);
                    return;
                }

                let signal = self.environment.signal();
                let decision = lock(&handle.inner.state)
                    .window
                    .evaluate(error.occurred_at, signal);

                match decision {
                    SuppressionDecision::Surface => {
                        tracing::error!(
                            "Connection error (code {:?}): {}",
                            error.effective_code(),
                            error.message
                        );
                        let observer = lock(&self.observers).error.clone();
                        if let Some(observer) = observer {
                            observer(&SurfacedError::from(&error));
                        }
                    }
                    SuppressionDecision::SuppressedInactive => {
                        tracing::debug!(
                            "Client inactive ({:?}) - not surfacing error: {}",
                            signal,
                            error.message
                        );
                    }
                    SuppressionDecision::SuppressedDebounce => {
                        tracing::debug!("Error suppressed within debounce window: {}", error.message);
                    }
                }
            }
        }
    }
}
