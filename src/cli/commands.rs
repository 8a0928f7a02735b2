//! Command handlers. Thin single-row CRUD against the store, plus the
//! `agg` entry point that hands control to the scheduler.

use std::time::Duration;

use anyhow::{bail, Context};
use chrono::DateTime;
use tokio::sync::watch;
use url::Url;

use super::State;
use crate::agg::Scheduler;
use crate::feed::build_client;
use crate::storage::User;

/// Resolve the logged-in user, or explain how to get one.
async fn current_user(state: &State) -> anyhow::Result<User> {
    let name = state
        .config
        .current_user_name
        .as_deref()
        .context("no user logged in; run `gleaner register <name>` or `gleaner login <name>`")?;

    state
        .db
        .get_user_by_name(name)
        .await?
        .with_context(|| format!("logged-in user {:?} no longer exists", name))
}

fn parse_feed_url(url: &str) -> anyhow::Result<Url> {
    let parsed = Url::parse(url).with_context(|| format!("invalid feed URL {:?}", url))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        bail!("feed URL must be http or https, got {:?}", parsed.scheme());
    }
    Ok(parsed)
}

pub async fn register(state: &mut State, name: &str) -> anyhow::Result<()> {
    if state.db.get_user_by_name(name).await?.is_some() {
        bail!("user {:?} already exists", name);
    }

    let user = state.db.create_user(name).await?;
    state.config.set_user(&user.name, &state.config_dir)?;

    println!("User {} created (id {})", user.name, user.id);
    Ok(())
}

pub async fn login(state: &mut State, name: &str) -> anyhow::Result<()> {
    let user = state
        .db
        .get_user_by_name(name)
        .await?
        .with_context(|| format!("user {:?} does not exist", name))?;

    state.config.set_user(&user.name, &state.config_dir)?;

    println!("User has been set to {}", user.name);
    Ok(())
}

pub async fn users(state: &State) -> anyhow::Result<()> {
    let current = state.config.current_user_name.as_deref();
    for user in state.db.get_users().await? {
        if Some(user.name.as_str()) == current {
            println!("* {} (current)", user.name);
        } else {
            println!("* {}", user.name);
        }
    }
    Ok(())
}

pub async fn reset(state: &State) -> anyhow::Result<()> {
    state.db.reset().await.context("reset unsuccessful")?;
    println!("Reset successful");
    Ok(())
}

pub async fn add_feed(state: &State, name: &str, url: &str) -> anyhow::Result<()> {
    let user = current_user(state).await?;
    let url = parse_feed_url(url)?;

    let feed = state.db.create_feed(name, url.as_str(), user.id).await?;
    state.db.create_feed_follow(user.id, feed.id).await?;

    println!("Added feed {} ({})", feed.name, feed.url);
    Ok(())
}

pub async fn feeds(state: &State) -> anyhow::Result<()> {
    for feed in state.db.get_feeds().await? {
        let owner = state
            .db
            .get_user_by_id(feed.user_id)
            .await?
            .map(|u| u.name)
            .unwrap_or_else(|| "?".to_string());
        println!("* {} - {} ({})", feed.name, feed.url, owner);
    }
    Ok(())
}

pub async fn follow(state: &State, url: &str) -> anyhow::Result<()> {
    let user = current_user(state).await?;
    let url = parse_feed_url(url)?;

    let feed = state
        .db
        .get_feed_by_url(url.as_str())
        .await?
        .with_context(|| format!("no feed with URL {:?}; add it first with `gleaner addfeed`", url.as_str()))?;

    state.db.create_feed_follow(user.id, feed.id).await?;

    println!("{} is now following {}", user.name, feed.name);
    Ok(())
}

pub async fn unfollow(state: &State, url: &str) -> anyhow::Result<()> {
    let user = current_user(state).await?;

    let feed = state
        .db
        .get_feed_by_url(url)
        .await?
        .with_context(|| format!("no feed with URL {:?}", url))?;

    state.db.delete_feed_follow(user.id, feed.id).await?;
    Ok(())
}

pub async fn following(state: &State) -> anyhow::Result<()> {
    let user = current_user(state).await?;
    for (i, name) in state
        .db
        .get_feed_follows_for_user(user.id)
        .await?
        .iter()
        .enumerate()
    {
        println!("{} - {}", i + 1, name);
    }
    Ok(())
}

pub async fn browse(state: &State, limit: i64) -> anyhow::Result<()> {
    let user = current_user(state).await?;

    for post in state.db.get_posts_for_user(user.id, limit).await? {
        let published = DateTime::from_timestamp(post.published_at, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        println!("{} ({})", post.title, published);
        println!("  {}", post.url);
        if let Some(description) = &post.description {
            println!("  {}", description);
        }
    }
    Ok(())
}

pub async fn agg(state: &State, interval: Duration) -> anyhow::Result<()> {
    println!("Collecting feeds every {:?} (ctrl-c to stop)", interval);

    let scheduler = Scheduler::new(state.db.clone(), build_client(), interval);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    scheduler
        .run(shutdown_rx)
        .await
        .context("aggregation stopped: feed store failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::Database;
    use std::path::PathBuf;

    async fn test_state(tag: &str) -> State {
        let config_dir = std::env::temp_dir().join(format!(
            "gleaner-cli-test-{}-{}",
            tag,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&config_dir);
        State {
            db: Database::open(":memory:").await.unwrap(),
            config: Config::default(),
            config_dir,
        }
    }

    fn cleanup(dir: &PathBuf) {
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_register_creates_user_and_logs_in() {
        let mut state = test_state("register").await;

        register(&mut state, "alice").await.unwrap();

        assert!(state.db.get_user_by_name("alice").await.unwrap().is_some());
        assert_eq!(state.config.current_user_name.as_deref(), Some("alice"));
        cleanup(&state.config_dir);
    }

    #[tokio::test]
    async fn test_register_rejects_existing_name() {
        let mut state = test_state("register-dup").await;

        register(&mut state, "alice").await.unwrap();
        assert!(register(&mut state, "alice").await.is_err());
        cleanup(&state.config_dir);
    }

    #[tokio::test]
    async fn test_login_requires_existing_user() {
        let mut state = test_state("login").await;
        assert!(login(&mut state, "ghost").await.is_err());
        cleanup(&state.config_dir);
    }

    #[tokio::test]
    async fn test_add_feed_requires_login() {
        let state = test_state("addfeed-nologin").await;
        assert!(add_feed(&state, "Blog", "https://example.com/rss")
            .await
            .is_err());
        cleanup(&state.config_dir);
    }

    #[tokio::test]
    async fn test_add_feed_creates_and_follows() {
        let mut state = test_state("addfeed").await;
        register(&mut state, "alice").await.unwrap();

        add_feed(&state, "Blog", "https://example.com/rss")
            .await
            .unwrap();

        let feed = state
            .db
            .get_feed_by_url("https://example.com/rss")
            .await
            .unwrap()
            .expect("feed created");
        let user = state.db.get_user_by_name("alice").await.unwrap().unwrap();
        let follows = state.db.get_feed_follows_for_user(user.id).await.unwrap();
        assert_eq!(follows, vec!["Blog".to_string()]);
        assert_eq!(feed.user_id, user.id);
        cleanup(&state.config_dir);
    }

    #[tokio::test]
    async fn test_add_feed_rejects_non_http_url() {
        let mut state = test_state("addfeed-scheme").await;
        register(&mut state, "alice").await.unwrap();

        assert!(add_feed(&state, "Bad", "file:///etc/passwd").await.is_err());
        assert!(add_feed(&state, "Bad", "not a url").await.is_err());
        cleanup(&state.config_dir);
    }

    #[tokio::test]
    async fn test_follow_unfollow_lifecycle() {
        let mut state = test_state("follow").await;
        register(&mut state, "alice").await.unwrap();
        add_feed(&state, "Blog", "https://example.com/rss")
            .await
            .unwrap();

        register(&mut state, "bob").await.unwrap();
        follow(&state, "https://example.com/rss").await.unwrap();

        let bob = state.db.get_user_by_name("bob").await.unwrap().unwrap();
        assert_eq!(
            state.db.get_feed_follows_for_user(bob.id).await.unwrap(),
            vec!["Blog".to_string()]
        );

        unfollow(&state, "https://example.com/rss").await.unwrap();
        assert!(state
            .db
            .get_feed_follows_for_user(bob.id)
            .await
            .unwrap()
            .is_empty());
        cleanup(&state.config_dir);
    }

    #[tokio::test]
    async fn test_follow_unknown_url_is_error() {
        let mut state = test_state("follow-unknown").await;
        register(&mut state, "alice").await.unwrap();
        assert!(follow(&state, "https://nope.example.com/rss").await.is_err());
        cleanup(&state.config_dir);
    }
}
