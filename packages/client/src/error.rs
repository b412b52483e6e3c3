//! Error types for the Noren chat client.

use thiserror::Error;

use crate::identity::NicknameError;

/// Client-specific errors
///
/// Transport faults are deliberately absent: they are classified and
/// surfaced by the connection manager and never returned to callers.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Required realtime credentials are missing
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// History fetch or message send failed
    #[error("Failed to {operation}: {reason}")]
    Request {
        /// What the client was doing ("load messages", "send message")
        operation: &'static str,
        /// Underlying cause
        reason: String,
    },

    /// Nickname rejected by validation
    #[error("Invalid nickname: {0}")]
    InvalidNickname(#[from] NicknameError),

    /// Persisted identity could not be read or written
    #[error("Identity store error: {0}")]
    Identity(String),
}

impl ClientError {
    /// Build a request failure for the given operation
    pub fn request(operation: &'static str, reason: impl ToString) -> Self {
        Self::Request {
            operation,
            reason: reason.to_string(),
        }
    }
}
