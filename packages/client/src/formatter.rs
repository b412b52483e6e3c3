//! Message formatting utilities for terminal display.

use chrono::{DateTime, Utc};

use crate::{
    message::IncomingMessage,
    realtime::{ConnectionState, SurfacedError},
};

const RULE: &str = "------------------------------------------------------------";

/// Message formatter for terminal display
pub struct MessageFormatter;

impl MessageFormatter {
    /// Upper-cased first character of a name, `?` when empty
    pub fn avatar_initial(username: &str) -> String {
        username
            .chars()
            .next()
            .map(|c| c.to_uppercase().collect())
            .unwrap_or_else(|| "?".to_string())
    }

    /// Compact age of a timestamp relative to `now`
    ///
    /// # Returns
    ///
    /// `now`, `{n}m ago`, `{n}h ago`, `{n}d ago`, or a short date such as
    /// `Jan 1` for anything a week or older
    pub fn relative_time(sent_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
        let elapsed = now.signed_duration_since(sent_at);
        let minutes = elapsed.num_minutes();
        let hours = elapsed.num_hours();
        let days = elapsed.num_days();

        if minutes < 1 {
            "now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if hours < 24 {
            format!("{}h ago", hours)
        } else if days < 7 {
            format!("{}d ago", days)
        } else {
            sent_at.format("%b %-d").to_string()
        }
    }

    /// Format a chat message
    ///
    /// # Arguments
    ///
    /// * `message` - The message to display
    /// * `now` - Reference time for the relative timestamp
    ///
    /// # Returns
    ///
    /// A formatted block; blocked messages show the rejection reason instead
    /// of their content
    pub fn format_message(message: &IncomingMessage, now: DateTime<Utc>) -> String {
        let time = message
            .sent_at()
            .map(|sent_at| Self::relative_time(sent_at, now))
            .unwrap_or_else(|| "now".to_string());

        let body = if message.is_blocked() {
            format!(
                "[blocked] {}",
                message
                    .rejection_reason
                    .as_deref()
                    .unwrap_or("Message blocked")
            )
        } else {
            message.content.clone()
        };

        format!(
            "\n{}\n[{}] @{} ({})\n{}\n{}\n",
            RULE,
            Self::avatar_initial(&message.username),
            message.username,
            time,
            body,
            RULE
        )
    }

    /// Format the history header
    pub fn format_history_header(count: usize) -> String {
        if count == 0 {
            "\nNo messages yet. Start the conversation!\n".to_string()
        } else {
            format!("\nMessages ({})\n", count)
        }
    }

    /// Format a connection state change
    pub fn format_connection_state(state: ConnectionState) -> String {
        let label = match state {
            ConnectionState::Connected => "realtime connected",
            ConnectionState::Connecting => "connecting...",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Unavailable => "realtime unavailable - retrying",
            ConnectionState::Failed => "realtime failed",
        };
        format!("\n* {}\n", label)
    }

    /// Format a surfaced transport error
    pub fn format_connection_error(error: &SurfacedError) -> String {
        match error.code {
            Some(code) => format!("\n! Connection problem ({}): {}\n", code, error.message),
            None => format!("\n! Connection problem: {}\n", error.message),
        }
    }

    /// Format a dismissible request failure
    pub fn format_request_error(error: &impl std::fmt::Display) -> String {
        format!("\n! {}\n", error)
    }
}
