//! Operator admin console (C9).
//!
//! A line-oriented REPL: normalize whitespace, tokenize, match the first
//! token against a fixed command table. An exact match dispatches directly;
//! otherwise the closest command by edit distance is suggested when within
//! 3, else "unknown command" is reported with no suggestion.

use crate::BrokerState;
use iplchat_common::config::AppConfig;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Notify;

const SUGGESTION_THRESHOLD: usize = 3;

struct Command {
    name: &'static str,
    usage: &'static str,
    description: &'static str,
    arity: usize,
}

const COMMANDS: &[Command] = &[
    Command { name: "help", usage: "help", description: "list available commands", arity: 0 },
    Command { name: "stop", usage: "stop", description: "flush pending writes and shut down", arity: 0 },
    Command { name: "clear", usage: "clear", description: "clear the console screen", arity: 0 },
    Command { name: "clients", usage: "clients", description: "list connected sessions", arity: 0 },
    Command { name: "snapshot", usage: "snapshot", description: "save a database snapshot", arity: 0 },
    Command {
        name: "snapshot-load",
        usage: "snapshot-load <name>",
        description: "load a saved snapshot",
        arity: 1,
    },
    Command {
        name: "snapshot-revert",
        usage: "snapshot-revert",
        description: "revert the most recent snapshot load",
        arity: 0,
    },
    Command { name: "snapshot-list", usage: "snapshot-list", description: "list saved snapshots", arity: 0 },
    Command { name: "log", usage: "log", description: "show recent log lines", arity: 0 },
    Command { name: "config", usage: "config", description: "print the active configuration", arity: 0 },
    Command { name: "license", usage: "license", description: "print license information", arity: 0 },
];

/// Outcome of running the console loop to completion — distinguishes an
/// operator-issued `stop` from EOF on stdin (e.g. a non-interactive run).
pub enum ConsoleExit {
    Stop,
    Eof,
}

/// Run the console loop against `stdin`/`stdout`, until `stop` is entered,
/// EOF is reached, or `shutdown` fires (server-initiated shutdown, e.g. from
/// a signal handler).
pub async fn run(state: Arc<BrokerState>, config: &AppConfig, shutdown: Arc<Notify>) -> ConsoleExit {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let _ = stdout.write_all(b"iplchat> ").await;
        let _ = stdout.flush().await;

        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = shutdown.notified() => return ConsoleExit::Stop,
        };

        let Ok(Some(raw)) = line else {
            return ConsoleExit::Eof;
        };
        let normalized = raw.split_whitespace().collect::<Vec<_>>();
        let Some((&cmd, args)) = normalized.split_first() else {
            continue;
        };

        match dispatch(cmd, args, &state, config).await {
            DispatchOutcome::Stop => return ConsoleExit::Stop,
            DispatchOutcome::Output(text) => {
                let _ = stdout.write_all(text.as_bytes()).await;
                let _ = stdout.write_all(b"\n").await;
            }
            DispatchOutcome::Continue => {}
        }
    }
}

enum DispatchOutcome {
    Continue,
    Stop,
    Output(String),
}

async fn dispatch(cmd: &str, args: &[&str], state: &Arc<BrokerState>, config: &AppConfig) -> DispatchOutcome {
    let Some(known) = COMMANDS.iter().find(|c| c.name == cmd) else {
        return DispatchOutcome::Output(suggest(cmd));
    };
    if args.len() != known.arity {
        return DispatchOutcome::Output(format!("usage: {}", known.usage));
    }

    match cmd {
        "help" => DispatchOutcome::Output(help_text()),
        "stop" => {
            if let Err(e) = state.engine.flush().await {
                tracing::warn!(error = %e, "flush on shutdown failed");
            }
            DispatchOutcome::Stop
        }
        "clear" => DispatchOutcome::Output("\x1B[2J\x1B[H".to_string()),
        "clients" => {
            let sessions = state.sessions.all().await;
            let lines: Vec<String> = sessions
                .iter()
                .map(|s| {
                    format!(
                        "stream={} user={} authenticated={}",
                        s.stream_id,
                        s.username.as_deref().unwrap_or("-"),
                        s.is_authenticated(),
                    )
                })
                .collect();
            DispatchOutcome::Output(if lines.is_empty() {
                "no connected clients".to_string()
            } else {
                lines.join("\n")
            })
        }
        "snapshot" => match state.engine.save_snapshot().await {
            Ok(name) => DispatchOutcome::Output(format!("saved snapshot {name}")),
            Err(e) => DispatchOutcome::Output(format!("snapshot failed: {e}")),
        },
        "snapshot-load" => match state.engine.load_snapshot(args[0]).await {
            Ok(()) => DispatchOutcome::Output(format!("loaded snapshot {}", args[0])),
            Err(e) => DispatchOutcome::Output(format!("snapshot load failed: {e}")),
        },
        "snapshot-revert" => match state.engine.revert_snapshot_load().await {
            Ok(()) => DispatchOutcome::Output("reverted last snapshot load".to_string()),
            Err(e) => DispatchOutcome::Output(format!("snapshot revert failed: {e}")),
        },
        "snapshot-list" => match state.engine.list_snapshots().await {
            Ok(names) if names.is_empty() => DispatchOutcome::Output("no snapshots".to_string()),
            Ok(names) => DispatchOutcome::Output(names.join("\n")),
            Err(e) => DispatchOutcome::Output(format!("snapshot list failed: {e}")),
        },
        "log" => DispatchOutcome::Output(format!("log file: {}", config.logfile_path.display())),
        "config" => DispatchOutcome::Output(config.to_key_value()),
        "license" => DispatchOutcome::Output(license_text()),
        _ => unreachable!("command table and match arms are kept in sync"),
    }
}

fn help_text() -> String {
    COMMANDS
        .iter()
        .map(|c| format!("{:<20} {}", c.usage, c.description))
        .collect::<Vec<_>>()
        .join("\n")
}

fn license_text() -> String {
    "iplchat is distributed under the AGPL-3.0-or-later license.".to_string()
}

/// Suggest the closest command by edit distance, if within the threshold
/// (distance ≥4 yields no suggestion).
fn suggest(input: &str) -> String {
    let closest = COMMANDS
        .iter()
        .map(|c| (c.name, edit_distance::edit_distance(input, c.name)))
        .min_by_key(|(_, dist)| *dist);

    match closest {
        Some((name, dist)) if dist <= SUGGESTION_THRESHOLD => {
            format!("unknown command: {input:?} — did you mean {name:?}?")
        }
        _ => format!("unknown command: {input:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_typo_is_suggested() {
        assert!(suggest("hepl").contains("help"));
    }

    #[test]
    fn far_off_input_yields_no_suggestion() {
        assert_eq!(suggest("xxxxxxxx"), "unknown command: \"xxxxxxxx\"");
    }
}
