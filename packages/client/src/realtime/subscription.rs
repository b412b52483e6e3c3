//! Subscription to the chat broadcast channel.

use std::sync::{Arc, Mutex};

use serde::Deserialize;

use crate::{
    config::RealtimeConfig, error::ClientError, message::IncomingMessage, sync::lock,
};

use super::manager::{BindingId, ConnectionHandle, ConnectionManager};

/// The single public channel every client listens on
pub const CHAT_CHANNEL: &str = "public-chat";

/// Application event carrying an [`IncomingMessage`]
pub const MESSAGE_EVENT: &str = "message-sent";

/// Parse a channel event payload.
///
/// Relays deliver the payload either as a JSON object or as a string holding
/// encoded JSON.
pub fn parse_message(data: &serde_json::Value) -> Result<IncomingMessage, serde_json::Error> {
    match data {
        serde_json::Value::String(encoded) => serde_json::from_str(encoded),
        other => IncomingMessage::deserialize(other),
    }
}

/// Subscribes the application to [`CHAT_CHANNEL`].
///
/// At most one binding is active per instance: a second `subscribe` while
/// the first is live returns an inert [`Subscription`] and registers nothing.
pub struct ChannelSubscription {
    manager: ConnectionManager,
    config: RealtimeConfig,
    active: Arc<Mutex<Option<BindingId>>>,
}

impl ChannelSubscription {
    pub fn new(manager: ConnectionManager, config: RealtimeConfig) -> Self {
        Self {
            manager,
            config,
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Whether a binding is currently active
    pub fn is_active(&self) -> bool {
        lock(&self.active).is_some()
    }

    /// Deliver every chat message to `on_message` until the returned
    /// subscription is torn down.
    ///
    /// # Errors
    ///
    /// `ClientError::Configuration` when the shared connection cannot be
    /// created; the caller should fall back to polling history
    pub fn subscribe<F>(&self, on_message: F) -> Result<Subscription, ClientError>
    where
        F: Fn(IncomingMessage) + Send + Sync + 'static,
    {
        let mut active = lock(&self.active);
        if active.is_some() {
            tracing::warn!(
                "Already subscribed to '{}' - ignoring duplicate subscribe",
                CHAT_CHANNEL
            );
            return Ok(Subscription { binding: None });
        }

        let handle = self.manager.get_or_create_connection(&self.config)?;
        tracing::info!(
            "Subscribing to channel '{}' (state: {})",
            CHAT_CHANNEL,
            handle.state()
        );

        let id = handle.bind_channel(
            CHAT_CHANNEL,
            MESSAGE_EVENT,
            Arc::new(move |data| match parse_message(data) {
                Ok(message) => {
                    tracing::debug!("Message received from '{}'", message.username);
                    on_message(message);
                }
                Err(e) => tracing::warn!("Discarding malformed '{}' payload: {}", MESSAGE_EVENT, e),
            }),
        );
        handle.subscribe_channel(CHAT_CHANNEL);
        *active = Some(id);

        Ok(Subscription {
            binding: Some(ActiveBinding {
                handle,
                id,
                slot: self.active.clone(),
            }),
        })
    }
}

struct ActiveBinding {
    handle: ConnectionHandle,
    id: BindingId,
    slot: Arc<Mutex<Option<BindingId>>>,
}

/// Disposable returned by [`ChannelSubscription::subscribe`].
///
/// Tearing it down (explicitly or by dropping it) unbinds the message
/// handler and unsubscribes from the channel. The shared connection stays up.
#[must_use = "dropping the subscription tears it down"]
pub struct Subscription {
    binding: Option<ActiveBinding>,
}

impl Subscription {
    /// Whether this subscription owns the active binding
    pub fn is_active(&self) -> bool {
        self.binding.is_some()
    }

    /// Release the binding and the channel subscription
    pub fn teardown(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let Some(binding) = self.binding.take() else {
            return;
        };

        tracing::info!("Unsubscribing from channel '{}'", CHAT_CHANNEL);
        binding.handle.unbind_channel(binding.id);
        binding.handle.unsubscribe_channel(CHAT_CHANNEL);

        let mut slot = lock(&binding.slot);
        if *slot == Some(binding.id) {
            *slot = None;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use noren_shared::time::SystemClock;

    use super::*;
    use crate::{
        message::MessageStatus,
        realtime::{
            environment::EnvironmentWatcher,
            transport::{ConnectionState, MockTransport, TransportEvent},
        },
        testing::FakeConnector,
    };

    fn config() -> RealtimeConfig {
        RealtimeConfig {
            host: Some("ws.example.com".to_string()),
            key: Some("abc123".to_string()),
            ..RealtimeConfig::default()
        }
    }

    fn create_subscription() -> (ChannelSubscription, ConnectionManager, Arc<FakeConnector>) {
        let connector = FakeConnector::new();
        let manager = ConnectionManager::new(
            connector.clone(),
            EnvironmentWatcher::default(),
            Arc::new(SystemClock),
        );
        let subscription = ChannelSubscription::new(manager.clone(), config());
        (subscription, manager, connector)
    }

    fn capture() -> (
        Arc<Mutex<Vec<IncomingMessage>>>,
        impl Fn(IncomingMessage) + Send + Sync + 'static,
    ) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        (received, move |message| {
            received_clone.lock().unwrap().push(message)
        })
    }

    fn chat_payload(id: i64, content: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "username": "alice",
            "content": content,
            "status": "APPROVED",
            "createdAt": "2024-01-01T00:00:00Z",
        })
    }

    #[test]
    fn test_end_to_end_message_delivery() {
        // テスト項目: 接続→connected→購読→メッセージ受信の一連の流れ
        // given (前提条件):
        let (subscription, manager, connector) = create_subscription();
        let handle = manager.get_or_create_connection(&config()).unwrap();
        assert_eq!(handle.state(), ConnectionState::Connecting);
        connector.emit_connected("123.456");
        assert_eq!(handle.state(), ConnectionState::Connected);
        let (received, handler) = capture();
        let _subscription = subscription.subscribe(handler).unwrap();

        // when (操作):
        connector.emit_channel_event(
            CHAT_CHANNEL,
            MESSAGE_EVENT,
            serde_json::json!({
                "username": "alice",
                "content": "hi",
                "status": "APPROVED",
                "createdAt": "2024-01-01T00:00:00Z",
            }),
        );

        // then (期待する結果):
        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        let message = &received[0];
        assert_eq!(message.username, "alice");
        assert_eq!(message.content, "hi");
        assert_eq!(message.status, MessageStatus::Approved);
        assert_eq!(
            message.created_at.map(|dt| dt.to_rfc3339()),
            Some("2024-01-01T00:00:00+00:00".to_string())
        );
        assert_eq!(connector.open_count(), 1);
    }

    #[test]
    fn test_subscribe_subscribes_to_chat_channel() {
        // テスト項目: subscribe でチャットチャネルが購読され、接続も要求される
        // given (前提条件):
        let (subscription, _manager, connector) = create_subscription();

        // when (操作):
        let active = subscription.subscribe(|_| {}).unwrap();

        // then (期待する結果):
        assert!(active.is_active());
        assert!(subscription.is_active());
        assert_eq!(connector.transport().subscribed(), vec![CHAT_CHANNEL]);
        assert_eq!(connector.transport().connect_count(), 1);
    }

    #[test]
    fn test_messages_delivered_in_transport_order() {
        // テスト項目: トランスポートの発行順にハンドラーが呼ばれる
        // given (前提条件):
        let (subscription, _manager, connector) = create_subscription();
        let (received, handler) = capture();
        let _active = subscription.subscribe(handler).unwrap();

        // when (操作):
        connector.emit_channel_event(CHAT_CHANNEL, MESSAGE_EVENT, chat_payload(1, "first"));
        connector.emit_channel_event(CHAT_CHANNEL, MESSAGE_EVENT, chat_payload(2, "second"));

        // then (期待する結果):
        let ids: Vec<Option<i64>> = received.lock().unwrap().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![Some(1), Some(2)]);
    }

    #[test]
    fn test_teardown_stops_delivery_and_keeps_connection() {
        // テスト項目: teardown 後はハンドラーが呼ばれず、共有接続は維持される
        // given (前提条件):
        let (subscription, manager, connector) = create_subscription();
        let (received, handler) = capture();
        let active = subscription.subscribe(handler).unwrap();
        let handle = manager.connection().unwrap();

        // when (操作):
        active.teardown();
        connector.emit_channel_event(CHAT_CHANNEL, MESSAGE_EVENT, chat_payload(1, "late"));

        // then (期待する結果):
        assert!(received.lock().unwrap().is_empty());
        assert_eq!(connector.transport().unsubscribed(), vec![CHAT_CHANNEL]);
        assert_eq!(handle.binding_count(CHAT_CHANNEL), 0);
        assert!(!subscription.is_active());
        assert!(manager.connection().is_some());
    }

    #[test]
    fn test_dropping_subscription_tears_it_down() {
        // テスト項目: Subscription を drop すると teardown と同じ解放が行われる
        // given (前提条件):
        let (subscription, manager, connector) = create_subscription();
        let active = subscription.subscribe(|_| {}).unwrap();

        // when (操作):
        drop(active);

        // then (期待する結果):
        assert_eq!(manager.connection().unwrap().binding_count(CHAT_CHANNEL), 0);
        assert_eq!(connector.transport().unsubscribed(), vec![CHAT_CHANNEL]);
    }

    #[test]
    fn test_duplicate_subscribe_is_ignored() {
        // テスト項目: 有効な購読がある間の 2 回目の subscribe は何も登録しない
        // given (前提条件):
        let (subscription, manager, connector) = create_subscription();
        let (received, handler) = capture();
        let first = subscription.subscribe(handler).unwrap();

        // when (操作):
        let (second_received, second_handler) = capture();
        let second = subscription.subscribe(second_handler).unwrap();
        connector.emit_channel_event(CHAT_CHANNEL, MESSAGE_EVENT, chat_payload(1, "once"));

        // then (期待する結果):
        assert!(first.is_active());
        assert!(!second.is_active());
        assert_eq!(received.lock().unwrap().len(), 1);
        assert!(second_received.lock().unwrap().is_empty());
        assert_eq!(manager.connection().unwrap().binding_count(CHAT_CHANNEL), 1);
        assert_eq!(connector.transport().subscribed().len(), 1);

        // when (操作):
        second.teardown();

        // then (期待する結果):
        assert!(subscription.is_active());
        assert!(connector.transport().unsubscribed().is_empty());
    }

    #[test]
    fn test_resubscribe_after_teardown() {
        // テスト項目: teardown 後は再び subscribe できる
        // given (前提条件):
        let (subscription, _manager, connector) = create_subscription();
        subscription.subscribe(|_| {}).unwrap().teardown();
        let (received, handler) = capture();

        // when (操作):
        let _active = subscription.subscribe(handler).unwrap();
        connector.emit_channel_event(CHAT_CHANNEL, MESSAGE_EVENT, chat_payload(3, "again"));

        // then (期待する結果):
        assert_eq!(received.lock().unwrap().len(), 1);
        assert_eq!(connector.open_count(), 1);
    }

    #[test]
    fn test_subscription_ack_marks_channel_confirmed() {
        // テスト項目: 購読成功イベントでチャネルが確認済みになり、接続状態は変わらない
        // given (前提条件):
        let (subscription, manager, connector) = create_subscription();
        let _active = subscription.subscribe(|_| {}).unwrap();
        let handle = manager.connection().unwrap();
        let state_before = handle.state();

        // when (操作):
        connector.emit(TransportEvent::SubscriptionSucceeded {
            channel: CHAT_CHANNEL.to_string(),
        });
        connector.emit(TransportEvent::SubscriptionError {
            channel: "other".to_string(),
            status: Some(403),
            message: "forbidden".to_string(),
        });

        // then (期待する結果):
        assert!(handle.is_subscription_confirmed(CHAT_CHANNEL));
        assert_eq!(handle.state(), state_before);
    }

    #[test]
    fn test_other_events_and_malformed_payloads_are_ignored() {
        // テスト項目: 別イベントや不正なペイロードはハンドラーに届かない
        // given (前提条件):
        let (subscription, _manager, connector) = create_subscription();
        let (received, handler) = capture();
        let _active = subscription.subscribe(handler).unwrap();

        // when (操作):
        connector.emit_channel_event(CHAT_CHANNEL, "user-status", chat_payload(1, "x"));
        connector.emit_channel_event("other-channel", MESSAGE_EVENT, chat_payload(2, "y"));
        connector.emit_channel_event(CHAT_CHANNEL, MESSAGE_EVENT, serde_json::json!(42));
        connector.emit_channel_event(
            CHAT_CHANNEL,
            MESSAGE_EVENT,
            serde_json::Value::String("not json".to_string()),
        );

        // then (期待する結果):
        assert!(received.lock().unwrap().is_empty());
    }

    #[test]
    fn test_string_encoded_payload_is_parsed() {
        // テスト項目: 文字列にエンコードされた JSON ペイロードも解析される
        // given (前提条件):
        let (subscription, _manager, connector) = create_subscription();
        let (received, handler) = capture();
        let _active = subscription.subscribe(handler).unwrap();
        let encoded = serde_json::Value::String(chat_payload(9, "encoded").to_string());

        // when (操作):
        connector.emit_channel_event(CHAT_CHANNEL, MESSAGE_EVENT, encoded);

        // then (期待する結果):
        assert_eq!(received.lock().unwrap()[0].content, "encoded");
    }

    #[test]
    fn test_local_datetime_payload_is_delivered() {
        // テスト項目: オフセット無しの createdAt を持つペイロードも捨てられずに届く
        // given (前提条件):
        let (subscription, _manager, connector) = create_subscription();
        let (received, handler) = capture();
        let _active = subscription.subscribe(handler).unwrap();

        // when (操作):
        connector.emit_channel_event(
            CHAT_CHANNEL,
            MESSAGE_EVENT,
            serde_json::json!({
                "id": 3,
                "username": "bob",
                "content": "from spring",
                "status": "APPROVED",
                "createdAt": "2024-01-01T00:00:00.123",
            }),
        );

        // then (期待する結果):
        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].content, "from spring");
        assert!(received[0].created_at.is_some());
    }

    #[test]
    fn test_payload_without_status_is_delivered() {
        // テスト項目: status の無いリレーのペイロードもそのままハンドラーに届く
        // given (前提条件):
        let (subscription, _manager, connector) = create_subscription();
        let (received, handler) = capture();
        let _active = subscription.subscribe(handler).unwrap();

        // when (操作):
        connector.emit_channel_event(
            CHAT_CHANNEL,
            MESSAGE_EVENT,
            serde_json::json!({"username": "alice", "content": "hi", "timestamp": 1}),
        );

        // then (期待する結果):
        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].username, "alice");
        assert_eq!(received[0].status, MessageStatus::Unknown);
        assert_eq!(received[0].timestamp, Some(1));
    }

    #[test]
    fn test_subscribe_and_teardown_reach_transport_once() {
        // テスト項目: モックトランスポートに subscribe と unsubscribe がそれぞれ 1 回だけ届く
        // given (前提条件):
        let mut transport = MockTransport::new();
        transport.expect_connect().times(1).return_const(());
        transport
            .expect_subscribe()
            .withf(|channel| channel.to_string() == CHAT_CHANNEL)
            .times(1)
            .return_const(());
        transport
            .expect_unsubscribe()
            .withf(|channel| channel.to_string() == CHAT_CHANNEL)
            .times(1)
            .return_const(());
        let connector = FakeConnector::with_transport(Arc::new(transport));
        let manager = ConnectionManager::new(
            connector,
            EnvironmentWatcher::default(),
            Arc::new(SystemClock),
        );
        let subscription = ChannelSubscription::new(manager.clone(), config());

        // when (操作):
        let active = subscription.subscribe(|_| {}).unwrap();
        let duplicate = subscription.subscribe(|_| {}).unwrap();
        duplicate.teardown();
        active.teardown();

        // then (期待する結果):
        // MockTransport verifies the call counts on drop
        assert!(!subscription.is_active());
        assert!(manager.connection().is_some());
    }

    #[test]
    fn test_subscribe_without_credentials_fails() {
        // テスト項目: 資格情報が無い場合 subscribe は ConfigurationError を返す
        // given (前提条件):
        let connector = FakeConnector::new();
        let manager = ConnectionManager::new(
            connector.clone(),
            EnvironmentWatcher::default(),
            Arc::new(SystemClock),
        );
        let subscription = ChannelSubscription::new(manager, RealtimeConfig::default());

        // when (操作):
        let result = subscription.subscribe(|_| {});

        // then (期待する結果):
        assert!(matches!(result, Err(ClientError::Configuration(_))));
        assert!(!subscription.is_active());
        assert_eq!(connector.open_count(), 0);
    }
}
