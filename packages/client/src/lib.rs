//! Terminal client for the Noren chat.
//!
//! The [`realtime`] module owns the shared Pusher connection, classifies and
//! debounces its errors, and binds the chat channel. [`api`] talks to the
//! REST backend and [`runner`] ties both into an interactive session.

pub mod api;
pub mod config;
pub mod error;
pub mod formatter;
pub mod identity;
pub mod message;
pub mod realtime;
pub mod runner;
pub(crate) mod sync;
#[cfg(test)]
pub(crate) mod testing;
pub mod ui;
