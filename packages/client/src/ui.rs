//! Terminal input and prompt helpers.

use std::{
    io::Write,
    sync::{Arc, Mutex},
};

use rustyline::{DefaultEditor, error::ReadlineError};
use tokio::sync::mpsc;

use crate::sync::lock;

/// Redisplay the prompt after printing asynchronous output
pub fn redisplay_prompt(prompt: &str) {
    print!("{}> ", prompt);
    std::io::stdout().flush().ok();
}

/// A command typed at the prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputCommand {
    /// Plain text to send as a chat message
    Say(String),
    /// `/nick <name>`
    ChangeNickname(String),
    /// `/away`: behave as if the window were hidden
    Away,
    /// `/back`: visible again
    Back,
    /// `/quit`
    Quit,
    /// `/history`: reload the message history
    History,
    /// Any other slash command
    Unknown(String),
}

/// Parse one trimmed, non-empty input line
pub fn parse_input(line: &str) -> InputCommand {
    let Some(command) = line.strip_prefix('/') else {
        return InputCommand::Say(line.to_string());
    };

    let (name, argument) = match command.split_once(char::is_whitespace) {
        Some((name, argument)) => (name, argument.trim()),
        None => (command, ""),
    };

    match name {
        "nick" => InputCommand::ChangeNickname(argument.to_string()),
        "away" => InputCommand::Away,
        "back" => InputCommand::Back,
        "quit" | "exit" => InputCommand::Quit,
        "history" => InputCommand::History,
        _ => InputCommand::Unknown(name.to_string()),
    }
}

/// Spawn a blocking thread running rustyline (synchronous readline).
///
/// Lines are forwarded to `input_tx`; the prompt is re-read before each line
/// so nickname changes show up immediately.
pub fn spawn_readline(prompt: Arc<Mutex<String>>, input_tx: mpsc::UnboundedSender<String>) {
    std::thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                eprintln!("Failed to initialize readline: {}", e);
                return;
            }
        };

        loop {
            let current = format!("{}> ", lock(&prompt));
            match rl.readline(&current) {
                Ok(line) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        rl.add_history_entry(line).ok();
                        if input_tx.send(line.to_string()).is_err() {
                            // Channel closed, exit thread
                            break;
                        }
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    // Ctrl+C
                    tracing::info!("Interrupted");
                    break;
                }
                Err(ReadlineError::Eof) => {
                    // Ctrl+D
                    tracing::info!("EOF");
                    break;
                }
                Err(err) => {
                    tracing::error!("Readline error: {}", err);
                    break;
                }
            }
        }
    });
}
