//! Command-line surface: one subcommand per operation, dispatched with a
//! plain `match` over the closed set.

mod commands;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::storage::Database;

#[derive(Parser, Debug)]
#[command(name = "gleaner", version, about = "Collects posts from the RSS feeds you follow")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a user and log in as them
    Register { name: String },
    /// Switch the current user
    Login { name: String },
    /// List registered users
    Users,
    /// Delete all users, feeds, follows, and posts
    Reset,
    /// Add a feed owned by the current user and follow it
    #[command(name = "addfeed")]
    AddFeed { name: String, url: String },
    /// List every feed in the store
    Feeds,
    /// Follow an existing feed by URL
    Follow { url: String },
    /// Stop following a feed
    Unfollow { url: String },
    /// List the feeds the current user follows
    Following,
    /// Show recent posts from followed feeds
    Browse {
        #[arg(default_value_t = 2)]
        limit: i64,
    },
    /// Run the aggregation loop until interrupted
    Agg {
        /// Polling interval, e.g. 30s, 5m, 1h
        #[arg(value_parser = parse_interval)]
        interval: Duration,
    },
}

/// Everything a command handler needs: the store, the config, and where
/// the config lives so login state can be persisted.
pub struct State {
    pub db: Database,
    pub config: Config,
    pub config_dir: PathBuf,
}

/// Dispatch a parsed command.
pub async fn run_command(state: &mut State, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Register { name } => commands::register(state, &name).await,
        Command::Login { name } => commands::login(state, &name).await,
        Command::Users => commands::users(state).await,
        Command::Reset => commands::reset(state).await,
        Command::AddFeed { name, url } => commands::add_feed(state, &name, &url).await,
        Command::Feeds => commands::feeds(state).await,
        Command::Follow { url } => commands::follow(state, &url).await,
        Command::Unfollow { url } => commands::unfollow(state, &url).await,
        Command::Following => commands::following(state).await,
        Command::Browse { limit } => commands::browse(state, limit).await,
        Command::Agg { interval } => commands::agg(state, interval).await,
    }
}

/// Parse a polling interval like `30s`, `5m`, `1h`, or bare seconds.
fn parse_interval(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let digits_end = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(digits_end);

    let n: u64 = number
        .parse()
        .map_err(|_| format!("invalid interval {:?}", s))?;

    let interval = match unit {
        "ms" => Duration::from_millis(n),
        "" | "s" => Duration::from_secs(n),
        "m" => Duration::from_secs(n * 60),
        "h" => Duration::from_secs(n * 3600),
        _ => return Err(format!("unknown interval unit {:?}", unit)),
    };

    if interval.is_zero() {
        return Err("interval must be positive".to_string());
    }
    Ok(interval)
}
