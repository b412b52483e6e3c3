//! Terminal chat session: history, realtime delivery and the input loop.

use std::{
    collections::HashSet,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, Utc};
use noren_shared::time::SystemClock;
use tokio::sync::mpsc;

use crate::{
    api::ChatApi,
    config::{ApiConfig, RealtimeConfig},
    error::ClientError,
    formatter::MessageFormatter,
    identity::{IdentityStore, validate_nickname},
    message::IncomingMessage,
    realtime::{
        ChannelSubscription, ConnectionManager, EnvironmentSignal, EnvironmentWatcher, HostEvent,
        REACHABILITY_INTERVAL, PusherConnector, Subscription, spawn_reachability_check,
    },
    sync::lock,
    ui::{InputCommand, parse_input, redisplay_prompt, spawn_readline},
};

const NICKNAME_PROMPT: &str = "nickname";

/// Everything the session needs, resolved from CLI args and the environment
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub api: ApiConfig,
    pub realtime: RealtimeConfig,
    /// Nickname given on the command line, validated before use
    pub nickname: Option<String>,
    pub identity_path: PathBuf,
    /// History polling interval used when realtime delivery is unavailable
    pub poll_interval: Duration,
}

/// Messages already printed, so polling does not repeat them
#[derive(Debug, Default)]
struct SeenMessages {
    keys: HashSet<String>,
}

impl SeenMessages {
    fn key(message: &IncomingMessage) -> String {
        match message.id {
            Some(id) => format!("id:{}", id),
            None => format!(
                "{}|{}|{:?}",
                message.username,
                message.content,
                message.sent_at()
            ),
        }
    }

    /// Record a message; returns `false` if it was already seen
    fn insert(&mut self, message: &IncomingMessage) -> bool {
        self.keys.insert(Self::key(message))
    }

    /// Format `message` for display unless it was shown before
    fn render_new(&mut self, message: &IncomingMessage, now: DateTime<Utc>) -> Option<String> {
        self.insert(message)
            .then(|| MessageFormatter::format_message(message, now))
    }
}

/// Run the chat session until the user quits or input closes
pub async fn run_client(options: ClientOptions) -> Result<(), ClientError> {
    let identity = IdentityStore::new(options.identity_path.clone());
    let prompt = Arc::new(Mutex::new(NICKNAME_PROMPT.to_string()));
    let (input_tx, mut input_rx) = mpsc::unbounded_channel::<String>();
    spawn_readline(prompt.clone(), input_tx);

    let Some(mut nickname) =
        resolve_nickname(options.nickname.as_deref(), &identity, &mut input_rx).await?
    else {
        tracing::info!("Input closed before a nickname was chosen");
        return Ok(());
    };
    if let Err(e) = identity.save(&nickname) {
        tracing::warn!("Failed to persist nickname: {}", e);
    }
    *lock(&prompt) = nickname.clone();

    println!(
        "\nYou are '{}'. Type messages and press Enter to send. /nick <name>, /away, /back, /history, /quit.\n",
        nickname
    );

    let api = ChatApi::new(&options.api);
    let mut seen = SeenMessages::default();
    print_history(&api, &mut seen).await;

    let environment = EnvironmentWatcher::new(EnvironmentSignal::default());
    let (host_tx, host_rx) = mpsc::unbounded_channel::<HostEvent>();
    let host_listeners = environment.listen(host_rx);

    let manager = ConnectionManager::new(
        Arc::new(PusherConnector::new(&options.realtime)),
        environment,
        Arc::new(SystemClock),
    );

    let prompt_for_state = prompt.clone();
    manager.on_state_change(move |_, current| {
        print!("{}", MessageFormatter::format_connection_state(current));
        redisplay_prompt(&lock(&prompt_for_state));
    });
    let prompt_for_error = prompt.clone();
    manager.on_error(move |error| {
        print!("{}", MessageFormatter::format_connection_error(error));
        redisplay_prompt(&lock(&prompt_for_error));
    });

    let (incoming_tx, mut incoming_rx) = mpsc::unbounded_channel::<IncomingMessage>();
    let channel = ChannelSubscription::new(manager.clone(), options.realtime.clone());
    let subscription: Option<Subscription> = match channel.subscribe(move |message| {
        let _ = incoming_tx.send(message);
    }) {
        Ok(subscription) => Some(subscription),
        Err(ClientError::Configuration(reason)) => {
            tracing::warn!(
                "Realtime delivery unavailable ({}); polling history every {:?}",
                reason,
                options.poll_interval
            );
            None
        }
        Err(e) => return Err(e),
    };

    let checker = match (&subscription, options.realtime.host.as_deref()) {
        (Some(_), Some(host)) => Some(spawn_reachability_check(
            format!("{}:{}", host, options.realtime.port),
            REACHABILITY_INTERVAL,
            host_tx.clone(),
        )),
        _ => None,
    };

    let mut poll = subscription.is_none().then(|| {
        let mut interval = tokio::time::interval(options.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval
    });

    redisplay_prompt(&nickname);

    loop {
        tokio::select! {
            line = input_rx.recv() => {
                let Some(line) = line else {
                    break;
                };

                match parse_input(&line) {
                    InputCommand::Quit => break,
                    InputCommand::Say(content) => {
                        match api.send_message(&nickname, &content).await {
                            // The realtime echo may arrive first, or never
                            Ok(record) => {
                                if let Some(text) = seen.render_new(&record, Utc::now()) {
                                    print!("{}", text);
                                }
                            }
                            Err(e) => print!("{}", MessageFormatter::format_request_error(&e)),
                        }
                    }
                    InputCommand::ChangeNickname(raw) => match validate_nickname(&raw) {
                        Ok(valid) => {
                            if let Err(e) = identity.save(&valid) {
                                tracing::warn!("Failed to persist nickname: {}", e);
                            }
                            println!("Nickname changed to '{}'", valid);
                            nickname = valid;
                            *lock(&prompt) = nickname.clone();
                        }
                        Err(e) => println!("{}", e),
                    },
                    InputCommand::Away => {
                        let _ = host_tx.send(HostEvent::VisibilityChanged { visible: false });
                        println!("Marked as away");
                    }
                    InputCommand::Back => {
                        let _ = host_tx.send(HostEvent::VisibilityChanged { visible: true });
                        println!("Welcome back");
                    }
                    InputCommand::History => print_history(&api, &mut seen).await,
                    InputCommand::Unknown(name) => println!("Unknown command: /{}", name),
                }
            }
            Some(message) = incoming_rx.recv() => {
                if let Some(text) = seen.render_new(&message, Utc::now()) {
                    print!("{}", text);
                    redisplay_prompt(&nickname);
                }
            }
            _ = async {
                match poll.as_mut() {
                    Some(interval) => {
                        interval.tick().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            } => {
                print_unseen(&api, &mut seen, &nickname).await;
            }
        }
    }

    if let Some(subscription) = subscription {
        subscription.teardown();
    }
    manager.cleanup();
    if let Some(checker) = checker {
        checker.abort();
    }
    host_listeners.detach();

    tracing::info!("Client session ended");
    Ok(())
}

/// Pick the nickname: CLI argument, then the identity store, then ask
///
/// Returns `None` if input closes before a valid nickname is entered.
async fn resolve_nickname(
    from_args: Option<&str>,
    identity: &IdentityStore,
    input_rx: &mut mpsc::UnboundedReceiver<String>,
) -> Result<Option<String>, ClientError> {
    if let Some(raw) = from_args {
        return Ok(Some(validate_nickname(raw)?));
    }

    match identity.load() {
        Ok(Some(stored)) => match validate_nickname(&stored) {
            Ok(valid) => return Ok(Some(valid)),
            Err(e) => tracing::warn!("Ignoring stored nickname: {}", e),
        },
        Ok(None) => {}
        Err(e) => tracing::warn!("Failed to read identity file: {}", e),
    }

    println!("Choose a nickname (2-30 characters)");
    while let Some(line) = input_rx.recv().await {
        match validate_nickname(&line) {
            Ok(valid) => return Ok(Some(valid)),
            Err(e) => println!("{}", e),
        }
    }

    Ok(None)
}

/// Fetch and print the whole history, oldest first
async fn print_history(api: &ChatApi, seen: &mut SeenMessages) {
    match api.fetch_history().await {
        Ok(messages) => {
            print!("{}", MessageFormatter::format_history_header(messages.len()));
            let now = Utc::now();
            for message in messages.iter().rev() {
                seen.insert(message);
                print!("{}", MessageFormatter::format_message(message, now));
            }
        }
        Err(e) => print!("{}", MessageFormatter::format_request_error(&e)),
    }
}

/// Fetch history and print only messages not shown yet
async fn print_unseen(api: &ChatApi, seen: &mut SeenMessages, nickname: &str) {
    match api.fetch_history().await {
        Ok(messages) => {
            let now = Utc::now();
            let mut printed = false;
            for message in messages.iter().rev() {
                if let Some(text) = seen.render_new(message, now) {
                    print!("{}", text);
                    printed = true;
                }
            }
            if printed {
                redisplay_prompt(nickname);
            }
        }
        Err(e) => tracing::warn!("History poll failed: {}", e),
    }
}
