//! Tally CLI - drives the client core from the command line.
//!
//! ```text
//! main() -> load config -> Dashboard::new() -> subcommand
//!                               |
//!                               v
//!              start() (verify stored credential) -> status | visit | list
//! ```
//!
//! Logs go to `~/.tally/logs/tally.log`, never to stdout, so command output
//! stays clean for piping.

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use tally_core::{Dashboard, GuardView, Resource, SessionState, TallyConfig};

#[derive(Debug, Parser)]
#[command(name = "tally", version, about = "Tally client core")]
struct Cli {
    /// Config file (default: ~/.tally/config.toml).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Verify the stored credential and print the session state.
    Status,
    /// Store a credential and verify it.
    Login { token: String },
    /// Clear the credential, cached data and session.
    Logout,
    /// Mount a guard for a route and report what it renders.
    Visit { route: String },
    /// Read a resource through the cache and print it as JSON.
    List {
        resource: Resource,
        #[arg(long)]
        page: Option<u32>,
    },
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_tally_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    tracing_subscriber::registry().with(env_filter).init();
}

fn open_tally_log_file() -> (Option<(PathBuf, std::fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in tally_log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn tally_log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(config_dir) = tally_config::config_dir() {
        candidates.push(config_dir.join("logs").join("tally.log"));
    }
    candidates.push(PathBuf::from(".tally").join("logs").join("tally.log"));

    candidates
}

fn load_config(path: Option<&PathBuf>) -> Result<TallyConfig> {
    let loaded = match path {
        Some(path) => TallyConfig::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        // A broken default config is logged and ignored, like a missing one.
        None => TallyConfig::load().ok().flatten(),
    };
    Ok(loaded.unwrap_or_default())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?
        .resolve()
        .context("invalid configuration")?;
    let dashboard = Dashboard::new(config)?;

    match cli.command {
        Command::Status => {
            let state = dashboard.start().await?;
            println!("{state}");
        }
        Command::Login { token } => {
            let identity = dashboard.login(&token).await?;
            println!("{}", SessionState::Resolved(Some(identity)));
        }
        Command::Logout => {
            dashboard.logout()?;
            println!("{}", dashboard.session());
        }
        Command::Visit { route } => {
            if let Err(err) = dashboard.start().await {
                eprintln!("warning: {err:#}");
            }
            let guard = dashboard.guard(
                &route,
                Arc::new(|target: &str| println!("redirect -> {target}")),
            );
            match guard.render() {
                GuardView::Children => println!("render {route}"),
                GuardView::Placeholder => println!("loading {route}"),
                GuardView::Nothing => {}
            }
        }
        Command::List { resource, page } => {
            let state = dashboard.start().await?;
            if !state.is_authenticated() {
                bail!("not signed in; run `tally login <token>` first");
            }
            let value = dashboard
                .list(resource, page)
                .await
                .with_context(|| format!("failed to list {resource}"))?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }

    Ok(())
}
