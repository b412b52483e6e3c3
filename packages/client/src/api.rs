//! HTTP client for the chat backend.
//!
//! The backend persists and moderates messages and re-emits them on the
//! broadcast channel. Send acknowledgements and realtime echoes race each
//! other, so callers must not pair them up.

use crate::{
    config::ApiConfig,
    error::ClientError,
    message::{IncomingMessage, OutgoingMessage},
};

const LOAD_MESSAGES: &str = "load messages";
const SEND_MESSAGE: &str = "send message";

/// Client for `/api/chat` and `/api/broadcast`
#[derive(Debug, Clone)]
pub struct ChatApi {
    http: reqwest::Client,
    base_url: String,
}

impl ChatApi {
    pub fn new(config: &ApiConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Message history, most recent first
    pub async fn fetch_history(&self) -> Result<Vec<IncomingMessage>, ClientError> {
        let response = self
            .http
            .get(self.url("/api/chat"))
            .send()
            .await
            .map_err(|e| ClientError::request(LOAD_MESSAGES, e))?;

        if !response.status().is_success() {
            return Err(ClientError::request(
                LOAD_MESSAGES,
                format!("HTTP {}", response.status()),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::request(LOAD_MESSAGES, e))
    }

    /// Submit a message; the backend decides its moderation status
    ///
    /// # Returns
    ///
    /// The record the backend created
    pub async fn send_message(
        &self,
        username: &str,
        content: &str,
    ) -> Result<IncomingMessage, ClientError> {
        let response = self
            .http
            .post(self.url("/api/chat"))
            .json(&OutgoingMessage::new(username, content))
            .send()
            .await
            .map_err(|e| ClientError::request(SEND_MESSAGE, e))?;

        if !response.status().is_success() {
            return Err(ClientError::request(
                SEND_MESSAGE,
                format!("HTTP {}", response.status()),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::request(SEND_MESSAGE, e))
    }

    /// Ask the relay to broadcast an arbitrary message.
    ///
    /// Fire and forget: failures are logged, never returned.
    pub async fn broadcast(&self, message: &serde_json::Value) {
        let result = self
            .http
            .post(self.url("/api/broadcast"))
            .json(message)
            .send()
            .await
            .and_then(|response| response.error_for_status());

        if let Err(e) = result {
            tracing::warn!("Failed to broadcast message: {}", e);
        }
    }
}
