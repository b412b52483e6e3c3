//! Realtime connection and subscription management.
//!
//! - [`classifier`]: transient vs persistent transport errors
//! - [`environment`]: visibility / reachability signals
//! - [`suppression`]: debounce gate for user-visible errors
//! - [`manager`]: the shared connection and its lifecycle
//! - [`subscription`]: the chat channel binding
//! - [`pusher`]: the Pusher protocol transport
//! - [`reachability`]: periodic network reachability checks

pub mod classifier;
pub mod environment;
pub mod manager;
pub mod pusher;
pub mod reachability;
pub mod subscription;
pub mod suppression;
pub mod transport;

pub use classifier::{ErrorClass, ErrorEvent, IDLE_CLOSE_CODE, classify};
pub use environment::{EnvironmentSignal, EnvironmentWatcher, HostEvent};
pub use manager::{ConnectionHandle, ConnectionManager, SurfacedError};
pub use pusher::PusherConnector;
pub use reachability::{REACHABILITY_INTERVAL, spawn_reachability_check};
pub use subscription::{CHAT_CHANNEL, ChannelSubscription, MESSAGE_EVENT, Subscription};
pub use suppression::{DEBOUNCE_INTERVAL_MS, SuppressionWindow};
pub use transport::{ConnectionState, Connector, EventSink, Transport, TransportEvent};
