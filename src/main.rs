use anyhow::{Context, Result};
use clap::Parser;

use gleaner::cli::{self, Cli, State};
use gleaner::config::{self, Config};
use gleaner::storage::Database;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config_dir = config::config_dir()?;
    let config = Config::load(&config_dir).context("failed to load configuration")?;

    let db_path = config.database_path(&config_dir);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }
    let db_path = db_path
        .to_str()
        .context("database path is not valid UTF-8")?;
    let db = Database::open(db_path)
        .await
        .context("failed to open database")?;

    let mut state = State {
        db,
        config,
        config_dir,
    };

    cli::run_command(&mut state, cli.command).await
}
