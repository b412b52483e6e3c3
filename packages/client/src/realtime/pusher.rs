//! Pusher protocol (v7) transport over `tokio-tungstenite`.
//!
//! A driver task owns the socket. [`PusherTransport`] only forwards requests
//! to it over a channel, and everything the driver observes is reported
//! through the [`EventSink`] in wire order.

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use futures_util::{Sink, SinkExt, StreamExt};
use noren_shared::time::{Clock, SystemClock};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::{
    sync::mpsc,
    time::{Instant, sleep, sleep_until, timeout},
};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

use crate::{
    config::{Credentials, RealtimeConfig},
    sync::lock,
};

use super::{
    classifier::{ErrorEvent, IDLE_CLOSE_CODE},
    transport::{ConnectionState, Connector, EventSink, Transport, TransportEvent},
};

/// Protocol revision spoken by this client
pub const PROTOCOL_VERSION: u8 = 7;

const CLIENT_NAME: &str = "noren-rust";
const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Build the websocket URL for `credentials`
pub fn socket_url(credentials: &Credentials) -> String {
    let scheme = if credentials.use_tls { "wss" } else { "ws" };
    format!(
        "{}://{}:{}/app/{}?protocol={}&client={}&version={}&flash=false",
        scheme,
        credentials.host,
        credentials.port,
        credentials.key,
        PROTOCOL_VERSION,
        CLIENT_NAME,
        env!("CARGO_PKG_VERSION"),
    )
}

/// What to do after the server closes the socket with `code`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// 4000-4099: do not retry until explicitly asked
    Fatal,
    /// 4100-4199: retry after backoff
    Backoff,
    /// 4200-4299: retry straight away
    Immediate,
}

/// Map a close code to the reconnect policy the protocol prescribes
pub fn reconnect_policy(code: u16) -> ReconnectPolicy {
    match code {
        4000..=4099 => ReconnectPolicy::Fatal,
        4200..=4299 => ReconnectPolicy::Immediate,
        _ => ReconnectPolicy::Backoff,
    }
}

/// Reconnect delay after `attempt` consecutive failures (0-based)
pub fn backoff_delay(attempt: u32, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.min(16));
    INITIAL_RECONNECT_DELAY.saturating_mul(factor).min(max)
}

/// Timing options for the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PusherOptions {
    pub pong_timeout: Duration,
    pub activity_timeout: Duration,
    pub max_reconnect_delay: Duration,
}

impl From<&RealtimeConfig> for PusherOptions {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            pong_timeout: config.pong_timeout,
            activity_timeout: config.activity_timeout,
            max_reconnect_delay: config.max_reconnect_delay,
        }
    }
}

/// Opens [`PusherTransport`]s.
///
/// `open` spawns the driver task and must run inside a Tokio runtime.
pub struct PusherConnector {
    options: PusherOptions,
    clock: Arc<dyn Clock>,
}

impl PusherConnector {
    pub fn new(config: &RealtimeConfig) -> Self {
        Self {
            options: PusherOptions::from(config),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl Connector for PusherConnector {
    fn open(&self, credentials: &Credentials, events: EventSink) -> Arc<dyn Transport> {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: std::sync::Mutex::new(ConnectionState::Disconnected),
            sink: events,
            clock: self.clock.clone(),
        });

        let driver = Driver {
            url: socket_url(credentials),
            options: self.options,
            shared: shared.clone(),
            commands: command_rx,
            channels: BTreeSet::new(),
        };
        tokio::spawn(driver.run());

        Arc::new(PusherTransport { shared, commands })
    }
}

enum Command {
    Connect,
    Subscribe(String),
    Unsubscribe(String),
}

struct Shared {
    state: std::sync::Mutex<ConnectionState>,
    sink: EventSink,
    clock: Arc<dyn Clock>,
}

impl Shared {
    fn set_state(&self, current: ConnectionState) {
        let previous = std::mem::replace(&mut *lock(&self.state), current);
        if previous != current {
            (self.sink)(TransportEvent::StateChange { previous, current });
        }
    }

    fn emit(&self, event: TransportEvent) {
        (self.sink)(event);
    }

    fn error(&self, code: Option<u16>, message: impl Into<String>) {
        let event = ErrorEvent::new(code, message, self.clock.now_millis());
        self.emit(TransportEvent::Error(event));
    }
}

/// Transport handle; requests are executed by the driver task
pub struct PusherTransport {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl PusherTransport {
    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::warn!("Transport driver stopped; request dropped");
        }
    }
}

impl Transport for PusherTransport {
    /// State transitions are reported by the driver task only, so they reach
    /// the sink in order.
    fn connect(&self) {
        self.send(Command::Connect);
    }

    fn subscribe(&self, channel: &str) {
        self.send(Command::Subscribe(channel.to_string()));
    }

    fn unsubscribe(&self, channel: &str) {
        self.send(Command::Unsubscribe(channel.to_string()));
    }
}

#[derive(Debug, Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct Established {
    socket_id: String,
    #[serde(default)]
    activity_timeout: Option<u64>,
}

/// Payloads may arrive as JSON-encoded strings
fn decode_data(data: Value) -> Value {
    match data {
        Value::String(encoded) => serde_json::from_str(&encoded).unwrap_or(Value::String(encoded)),
        other => other,
    }
}

fn encode(event: &str, data: Value) -> Message {
    Message::Text(json!({ "event": event, "data": data }).to_string().into())
}

/// Send one protocol frame; a failure is logged and reported as `false`
async fn send_frame<S>(write: &mut S, event: &str, data: Value) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    match write.send(encode(event, data)).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Failed to send '{}': {}", event, e);
            false
        }
    }
}

/// How a session or connection attempt ended
enum SessionEnd {
    /// Socket lost; carries the close code if the server sent one
    Closed {
        code: Option<u16>,
        established: bool,
    },
    /// The owning transport was dropped
    Shutdown,
}

/// How the driver proceeds after a failure
enum Next {
    Retry(Duration),
    Idle,
    Stop,
}

struct Driver {
    url: String,
    options: PusherOptions,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
    channels: BTreeSet<String>,
}

impl Driver {
    async fn run(mut self) {
        'idle: loop {
            if !self.wait_for_connect().await {
                break;
            }

            let mut attempt = 0u32;
            loop {
                self.shared.set_state(ConnectionState::Connecting);
                let next = match self.attempt().await {
                    Ok(SessionEnd::Shutdown) => Next::Stop,
                    Ok(SessionEnd::Closed { code, established }) => {
                        if established {
                            attempt = 0;
                        }
                        let next = self.after_close(code, attempt);
                        attempt = attempt.saturating_add(1);
                        next
                    }
                    Err(reason) => {
                        tracing::warn!("Connection attempt failed: {}", reason);
                        self.shared.error(None, reason);
                        self.shared.set_state(ConnectionState::Unavailable);
                        let delay = backoff_delay(attempt, self.options.max_reconnect_delay);
                        attempt = attempt.saturating_add(1);
                        Next::Retry(delay)
                    }
                };

                match next {
                    Next::Stop => break 'idle,
                    Next::Idle => continue 'idle,
                    Next::Retry(delay) => {
                        if !self.wait_before_retry(delay).await {
                            break 'idle;
                        }
                    }
                }
            }
        }
        tracing::debug!("Transport driver stopped");
    }

    fn after_close(&self, code: Option<u16>, attempt: u32) -> Next {
        match code.map(reconnect_policy) {
            Some(ReconnectPolicy::Fatal) => {
                tracing::error!("Server refused the connection (code {:?})", code);
                self.shared
                    .error(code, format!("Connection refused by server (code {:?})", code));
                self.shared.set_state(ConnectionState::Failed);
                Next::Idle
            }
            Some(ReconnectPolicy::Immediate) => {
                tracing::info!("Server asked for an immediate reconnect (code {:?})", code);
                self.shared.set_state(ConnectionState::Connecting);
                Next::Retry(Duration::ZERO)
            }
            Some(ReconnectPolicy::Backoff) if code.is_some_and(|c| c >= 4100) => {
                self.shared.set_state(ConnectionState::Unavailable);
                Next::Retry(backoff_delay(attempt, self.options.max_reconnect_delay))
            }
            _ => {
                // Routine socket recycling; the manager treats this as transient
                self.shared.error(
                    Some(IDLE_CLOSE_CODE),
                    format!("Connection closed (code {:?})", code),
                );
                self.shared.set_state(ConnectionState::Connecting);
                let delay = match attempt {
                    0 => Duration::ZERO,
                    n => backoff_delay(n - 1, self.options.max_reconnect_delay),
                };
                Next::Retry(delay)
            }
        }
    }

    /// Wait for the first connect request, tracking channel requests meanwhile
    async fn wait_for_connect(&mut self) -> bool {
        while let Some(command) = self.commands.recv().await {
            if let Command::Connect = command {
                return true;
            }
            self.track(command);
        }
        false
    }

    /// Sleep before the next attempt; a connect request cuts the wait short
    async fn wait_before_retry(&mut self, delay: Duration) -> bool {
        if delay.is_zero() {
            return true;
        }
        tracing::info!("Reconnecting in {:?}", delay);

        let deadline = sleep(delay);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => return true,
                command = self.commands.recv() => match command {
                    Some(Command::Connect) => return true,
                    Some(other) => self.track(other),
                    None => return false,
                },
            }
        }
    }

    fn track(&mut self, command: Command) {
        match command {
            Command::Subscribe(channel) => {
                self.channels.insert(channel);
            }
            Command::Unsubscribe(channel) => {
                self.channels.remove(&channel);
            }
            Command::Connect => {}
        }
    }

    async fn attempt(&mut self) -> Result<SessionEnd, String> {
        tracing::debug!("Opening socket {}", self.url);
        let (socket, _response) = timeout(self.options.pong_timeout, connect_async(&self.url))
            .await
            .map_err(|_| "connection attempt timed out".to_string())?
            .map_err(|e| e.to_string())?;

        let (mut write, mut read) = socket.split();
        let mut established = false;
        let mut activity_timeout = self.options.activity_timeout;
        let mut last_activity = Instant::now();
        let mut awaiting_pong = false;

        loop {
            let deadline = if awaiting_pong {
                last_activity + activity_timeout + self.options.pong_timeout
            } else {
                last_activity + activity_timeout
            };

            tokio::select! {
                frame = read.next() => {
                    last_activity = Instant::now();
                    awaiting_pong = false;
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            let Ok(frame) = serde_json::from_str::<Frame>(text.as_str()) else {
                                tracing::debug!("Ignoring undecodable frame: {}", text.as_str());
                                continue;
                            };
                            match frame.event.as_str() {
                                "pusher:connection_established" => {
                                    let data = decode_data(frame.data);
                                    let info: Established = serde_json::from_value(data)
                                        .map_err(|e| format!("bad handshake: {}", e))?;
                                    if let Some(secs) = info.activity_timeout {
                                        activity_timeout = activity_timeout.min(Duration::from_secs(secs));
                                    }
                                    established = true;
                                    self.shared.set_state(ConnectionState::Connected);
                                    self.shared.emit(TransportEvent::Connected { socket_id: info.socket_id });
                                    for channel in &self.channels {
                                        if !send_frame(&mut write, "pusher:subscribe", json!({ "channel": channel })).await {
                                            return Ok(SessionEnd::Closed { code: None, established });
                                        }
                                    }
                                }
                                "pusher:ping" => {
                                    if !send_frame(&mut write, "pusher:pong", json!({})).await {
                                        return Ok(SessionEnd::Closed { code: None, established });
                                    }
                                }
                                "pusher:pong" => {}
                                "pusher:error" => {
                                    let data = decode_data(frame.data);
                                    let event = ErrorEvent::from_protocol_payload(&data, self.shared.clock.now_millis());
                                    self.shared.emit(TransportEvent::Error(event));
                                }
                                "pusher_internal:subscription_succeeded" => {
                                    if let Some(channel) = frame.channel {
                                        self.shared.emit(TransportEvent::SubscriptionSucceeded { channel });
                                    }
                                }
                                "pusher:subscription_error" => {
                                    let data = decode_data(frame.data);
                                    self.shared.emit(TransportEvent::SubscriptionError {
                                        channel: frame.channel.unwrap_or_default(),
                                        status: data.get("status").and_then(Value::as_u64).and_then(|s| u16::try_from(s).ok()),
                                        message: data.get("error").and_then(Value::as_str).map(str::to_string).unwrap_or_else(|| data.to_string()),
                                    });
                                }
                                _ => match frame.channel {
                                    Some(channel) => self.shared.emit(TransportEvent::ChannelEvent {
                                        channel,
                                        event: frame.event,
                                        data: decode_data(frame.data),
                                    }),
                                    None => tracing::debug!("Ignoring event '{}'", frame.event),
                                },
                            }
                        }
                        Some(Ok(Message::Close(close))) => {
                            let code = close.map(|c| u16::from(c.code));
                            tracing::info!("Server closed the connection (code {:?})", code);
                            return Ok(SessionEnd::Closed { code, established });
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!("WebSocket read error: {}", e);
                            return Ok(SessionEnd::Closed { code: None, established });
                        }
                        None => return Ok(SessionEnd::Closed { code: None, established }),
                    }
                }
                command = self.commands.recv() => match command {
                    Some(Command::Subscribe(channel)) => {
                        if self.channels.insert(channel.clone()) && established {
                            // Still tracked on failure, so the next session subscribes again
                            if !send_frame(&mut write, "pusher:subscribe", json!({ "channel": channel })).await {
                                return Ok(SessionEnd::Closed { code: None, established });
                            }
                        }
                    }
                    Some(Command::Unsubscribe(channel)) => {
                        if self.channels.remove(&channel) && established {
                            if !send_frame(&mut write, "pusher:unsubscribe", json!({ "channel": channel })).await {
                                return Ok(SessionEnd::Closed { code: None, established });
                            }
                        }
                    }
                    Some(Command::Connect) => {}
                    None => {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(SessionEnd::Shutdown);
                    }
                },
                _ = sleep_until(deadline) => {
                    if awaiting_pong {
                        tracing::warn!("Pong not received within {:?}", self.options.pong_timeout);
                        return Ok(SessionEnd::Closed { code: Some(IDLE_CLOSE_CODE), established });
                    }
                    tracing::debug!("Connection idle - sending ping");
                    if !send_frame(&mut write, "pusher:ping", json!({})).await {
                        return Ok(SessionEnd::Closed { code: None, established });
                    }
                    awaiting_pong = true;
                }
            }
        }
    }
}
