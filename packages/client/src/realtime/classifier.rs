//! Transport error classification.
//!
//! Separates routine keep-alive recycling of the socket (which the transport
//! recovers from on its own) from faults the user should hear about.

use serde::Deserialize;

/// Close code the transport reports when an idle socket is recycled
pub const IDLE_CLOSE_CODE: u16 = 1006;

/// An error reported by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub code: Option<u16>,
    /// Code nested in the error's data payload, if any
    pub data_code: Option<u16>,
    pub message: String,
    /// Unix timestamp (milliseconds)
    pub occurred_at: i64,
}

impl ErrorEvent {
    pub fn new(code: Option<u16>, message: impl Into<String>, occurred_at: i64) -> Self {
        Self {
            code,
            data_code: None,
            message: message.into(),
            occurred_at,
        }
    }

    /// Attach a nested data code
    pub fn with_data_code(mut self, data_code: u16) -> Self {
        self.data_code = Some(data_code);
        self
    }

    /// Build an event from a `pusher:error` payload (`{code, message}`)
    pub fn from_protocol_payload(payload: &serde_json::Value, occurred_at: i64) -> Self {
        #[derive(Deserialize)]
        struct Payload {
            code: Option<u16>,
            message: Option<String>,
            data: Option<Nested>,
        }
        #[derive(Deserialize)]
        struct Nested {
            code: Option<u16>,
        }

        match serde_json::from_value::<Payload>(payload.clone()) {
            Ok(p) => Self {
                code: p.code,
                data_code: p.data.and_then(|d| d.code),
                message: p.message.unwrap_or_else(|| "transport error".to_string()),
                occurred_at,
            },
            Err(_) => Self::new(None, payload.to_string(), occurred_at),
        }
    }

    /// First code that is present, top-level first
    pub fn effective_code(&self) -> Option<u16> {
        self.code.or(self.data_code)
    }
}

/// Classification outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Self-healing; never shown to the user
    Transient,
    /// Shown to the user, subject to debouncing
    Persistent,
}

/// Classify a transport error.
///
/// # Returns
///
/// `ErrorClass::Transient` if either the top-level or the nested data code is
/// the idle close code, `ErrorClass::Persistent` otherwise
pub fn classify(event: &ErrorEvent) -> ErrorClass {
    if event.code == Some(IDLE_CLOSE_CODE) || event.data_code == Some(IDLE_CLOSE_CODE) {
        ErrorClass::Transient
    } else {
        ErrorClass::Persistent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_close_code_is_transient() {
        // テスト項目: アイドルクローズコード 1006 は一時的エラーと判定される
        // given (前提条件):
        let event = ErrorEvent::new(Some(1006), "closed", 0);

        // when (操作):
        let class = classify(&event);

        // then (期待する結果):
        assert_eq!(class, ErrorClass::Transient);
    }

    #[test]
    fn test_nested_idle_close_code_is_transient() {
        // テスト項目: data 内にネストされた 1006 も一時的エラーと判定される
        // given (前提条件):
        let event = ErrorEvent::new(None, "closed", 0).with_data_code(1006);

        // when (操作):
        let class = classify(&event);

        // then (期待する結果):
        assert_eq!(class, ErrorClass::Transient);
    }

    #[test]
    fn test_other_codes_are_persistent() {
        // テスト項目: 1006 以外のコードは永続的エラーと判定される
        // given (前提条件):
        let events = [
            ErrorEvent::new(Some(4001), "app disabled", 0),
            ErrorEvent::new(Some(1002), "protocol error", 0),
            ErrorEvent::new(None, "connection refused", 0),
        ];

        // when (操作):
        let classes: Vec<ErrorClass> = events.iter().map(classify).collect();

        // then (期待する結果):
        assert!(classes.iter().all(|c| *c == ErrorClass::Persistent));
    }

    #[test]
    fn test_from_protocol_payload_reads_code_and_message() {
        // テスト項目: pusher:error のペイロードからコードとメッセージを取り出せる
        // given (前提条件):
        let payload = serde_json::json!({"code": 4201, "message": "Pong reply not received"});

        // when (操作):
        let event = ErrorEvent::from_protocol_payload(&payload, 10);

        // then (期待する結果):
        assert_eq!(event.code, Some(4201));
        assert_eq!(event.message, "Pong reply not received");
        assert_eq!(event.occurred_at, 10);
        assert_eq!(event.effective_code(), Some(4201));
    }

    #[test]
    fn test_from_protocol_payload_reads_nested_code() {
        // テスト項目: data.code にネストされたコードも読み取れる
        // given (前提条件):
        let payload = serde_json::json!({"data": {"code": 1006}});

        // when (操作):
        let event = ErrorEvent::from_protocol_payload(&payload, 0);

        // then (期待する結果):
        assert_eq!(event.code, None);
        assert_eq!(event.data_code, Some(1006));
        assert_eq!(classify(&event), ErrorClass::Transient);
    }
}
