//! Chat message payloads exchanged with the backend and the broadcast channel.
//!
//! The realtime core passes these through untouched; only the formatter and
//! the terminal UI look inside. Decoding is lenient: missing fields fall back
//! to defaults and timestamps the client cannot read become `None`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Moderation outcome assigned by the backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Approved,
    Blocked,
    /// Anything else (including the empty status of a not-yet-moderated message)
    #[default]
    #[serde(other)]
    Unknown,
}

/// A chat message as produced by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub status: MessageStatus,
    #[serde(
        default,
        deserialize_with = "lenient_datetime",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    /// Broadcast relays stamp events with epoch millis instead of `createdAt`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

impl IncomingMessage {
    /// Whether moderation blocked this message
    pub fn is_blocked(&self) -> bool {
        self.status == MessageStatus::Blocked
    }

    /// Best available creation time
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
            .or_else(|| self.timestamp.and_then(noren_shared::time::millis_to_datetime))
    }
}

/// Accept RFC 3339, an offset-less local date-time (read as UTC), epoch
/// millis, or a `[y, m, d, h, min, s, nanos]` array. Anything else is `None`.
fn lenient_datetime<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(parse_datetime))
}

fn parse_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            }),
        Value::Number(millis) => millis
            .as_i64()
            .and_then(noren_shared::time::millis_to_datetime),
        Value::Array(parts) => {
            let part = |i: usize| parts.get(i).and_then(Value::as_u64).unwrap_or(0);
            let year = parts.first().and_then(Value::as_i64)?;
            NaiveDate::from_ymd_opt(i32::try_from(year).ok()?, part(1) as u32, part(2) as u32)?
                .and_hms_nano_opt(part(3) as u32, part(4) as u32, part(5) as u32, part(6) as u32)
                .map(|naive| naive.and_utc())
        }
        _ => None,
    }
}

/// Body of `POST /api/chat`
///
/// `status` is always sent empty; the backend decides it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingMessage {
    pub username: String,
    pub content: String,
    pub status: String,
}

impl OutgoingMessage {
    pub fn new(username: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            content: content.into(),
            status: String::new(),
        }
    }
}
