//! Shared utilities for the Noren chat client.

pub mod logger;
pub mod time;
