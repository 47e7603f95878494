//! `todosync`: a personal task list kept in sync with a change feed.
//!
//! Runs a line-oriented shell against the in-process backend. Configuration
//! via CLI flags, environment variables, or config file
//! (`~/.config/todosync/config.toml`).
//!
//! ```bash
//! # Start signed out, then `login alice`
//! cargo run --bin todosync
//!
//! # Sign in on startup
//! cargo run --bin todosync -- --user-id alice
//! TODOSYNC_USER=alice cargo run --bin todosync
//! ```

use std::io;
use std::path::Path;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

use todosync::app::{App, Dispatch};
use todosync::backend::memory::{MemoryBackend, MemorySession};
use todosync::config::{CliArgs, ClientConfig};
use todosync::sync::{SyncCommand, spawn_sync};
use todosync::tasks::Reconciler;

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    // Logs go to a file; stdout belongs to the shell.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    tracing::info!(table = %config.table, "todosync starting");
    let result = run_shell(&config).await;
    tracing::info!("todosync exiting");
    result
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("todosync.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{line}");
    }
}

/// Read intents from stdin and print worker events until `quit` or EOF.
async fn run_shell(config: &ClientConfig) -> io::Result<()> {
    let backend = MemoryBackend::with_table(config.table.clone());
    let session = MemorySession::new();
    let reconciler = Reconciler::new(backend.clone())
        .with_max_title_len(config.max_title_len)
        .with_request_timeout(config.request_timeout);

    let mut handle = spawn_sync(reconciler, backend, session.clone(), config.to_sync_config());
    let mut app = App::new();

    if let Some(user) = config.user_id.clone() {
        session.sign_in(user);
    } else {
        println!("Not signed in. Type `login <user>` to start, `help` for commands.");
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    // Waits here until the worker has room; stdin is not read meanwhile.
    let mut pending: Option<SyncCommand> = None;

    loop {
        tokio::select! {
            permit = handle.commands.reserve(), if pending.is_some() => {
                let Ok(permit) = permit else {
                    tracing::warn!("sync worker gone");
                    break;
                };
                if let Some(command) = pending.take() {
                    permit.send(command);
                }
            }
            line = stdin.next_line(), if pending.is_none() => {
                let Some(line) = line? else { break };
                match app.handle_line(&line) {
                    Dispatch::Command(command) => pending = Some(command),
                    Dispatch::SignIn(user) => {
                        tracing::info!(user = %user, "signing in");
                        session.sign_in(user);
                    }
                    Dispatch::Print(lines) => print_lines(&lines),
                    Dispatch::Quit => break,
                }
            }
            event = handle.events.recv() => {
                let Some(event) = event else { break };
                print_lines(&app.handle_event(event));
            }
        }
    }

    // Closing both channels stops the worker even if it is blocked emitting.
    drop(handle.events);
    drop(handle.commands);
    if let Err(e) = handle.join.await {
        tracing::warn!(error = %e, "sync worker panicked");
    }
    Ok(())
}
