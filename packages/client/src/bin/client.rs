//! Terminal chat client with realtime delivery over a Pusher-protocol server.
//!
//! Reads the realtime credentials from `SOKETI_APP_HOST`, `SOKETI_APP_KEY`,
//! `SOKETI_APP_ID`, `SOKETI_PORT` and `SOKETI_USE_TLS`. Without them the client
//! falls back to polling the message history.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin noren-client -- --nickname Alice
//! cargo run --bin noren-client -- --api-url http://localhost:8080 -p 10
//! ```

use std::{path::PathBuf, time::Duration};

use clap::Parser;

use noren_client::{
    config::{ApiConfig, ENV_API_URL, RealtimeConfig},
    identity::IdentityStore,
    runner::{ClientOptions, run_client},
};
use noren_shared::logger::{default_log_level, setup_logger};

#[derive(Parser, Debug)]
#[command(name = "noren-client")]
#[command(about = "Terminal chat client with realtime delivery", long_about = None)]
struct Args {
    /// Backend API base URL
    #[arg(short = 'u', long, env = ENV_API_URL)]
    api_url: Option<String>,

    /// Nickname to chat as (2-30 characters); remembered for next time
    #[arg(short = 'n', long)]
    nickname: Option<String>,

    /// History polling interval when realtime delivery is unavailable
    #[arg(short = 'p', long, default_value_t = 5)]
    poll_interval_secs: u64,

    /// File that stores the chosen nickname
    #[arg(long)]
    identity_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let realtime = RealtimeConfig::from_env();

    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), default_log_level(realtime.production));

    let args = Args::parse();

    let api = match args.api_url {
        Some(base_url) => ApiConfig { base_url },
        None => ApiConfig::from_env(),
    };

    let options = ClientOptions {
        api,
        realtime,
        nickname: args.nickname,
        identity_path: args
            .identity_file
            .unwrap_or_else(IdentityStore::default_path),
        poll_interval: Duration::from_secs(args.poll_interval_secs.max(1)),
    };

    if let Err(e) = run_client(options).await {
        tracing::error!("Client error: {}", e);
        std::process::exit(1);
    }
}
