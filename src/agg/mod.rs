//! The aggregation loop: pick the stalest feed, fetch, parse, ingest.
//!
//! One logical worker. Cycles never overlap; the interval timer only
//! yields the next tick after the current cycle completes, and slow
//! cycles delay ticks rather than queuing them. Per-item and per-cycle
//! failures are logged and absorbed; only the store failing underneath
//! the scheduler terminates the loop.

mod ingest;

pub use ingest::{ingest, IngestError};

use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::feed;
use crate::storage::{Database, InsertOutcome, StoreError};

/// Per-request timeout for feed fetches.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// What one aggregation cycle did. Returned for observability; the
/// scheduler folds these into its lifetime totals.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    pub inserted: usize,
    pub duplicates: usize,
    pub failed_items: usize,
}

impl CycleStats {
    fn absorb(&mut self, other: CycleStats) {
        self.inserted += other.inserted;
        self.duplicates += other.duplicates;
        self.failed_items += other.failed_items;
    }
}

/// The polling loop, explicitly constructed and torn down.
///
/// Owns its database handle, HTTP client, and cadence; shutdown arrives
/// through the `watch` channel passed to [`run`](Scheduler::run).
pub struct Scheduler {
    db: Database,
    client: reqwest::Client,
    interval: Duration,
}

impl Scheduler {
    pub fn new(db: Database, client: reqwest::Client, interval: Duration) -> Self {
        Self {
            db,
            client,
            interval,
        }
    }

    /// Run cycles at a fixed cadence until shutdown is signalled or the
    /// store fails. The first cycle runs immediately.
    ///
    /// Shutdown is raced against both the tick and the in-flight cycle,
    /// so a stop request cancels at the next await point; nothing beyond
    /// the already-committed `last_fetched_at` update is left half done.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), StoreError> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut totals = CycleStats::default();
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }

            let cycle = tokio::select! {
                res = self.run_cycle() => res?,
                _ = shutdown.changed() => break,
            };
            totals.absorb(cycle);
        }

        tracing::info!(
            inserted = totals.inserted,
            duplicates = totals.duplicates,
            failed_items = totals.failed_items,
            "aggregation stopped"
        );
        Ok(())
    }

    /// One cycle: select, mark polled, fetch, parse, ingest.
    ///
    /// Fetch and parse failures abort the cycle but not the loop; store
    /// errors from the scheduler's own calls propagate and are fatal.
    pub async fn run_cycle(&self) -> Result<CycleStats, StoreError> {
        let Some(next) = self.db.next_feed_to_poll().await? else {
            tracing::debug!("no feeds to poll");
            return Ok(CycleStats::default());
        };

        // Stamp before fetching: a crash mid-fetch must not put this
        // feed ahead of the others on restart.
        self.db
            .mark_feed_polled(next.id, Utc::now().timestamp())
            .await?;

        let bytes = match feed::fetch(&self.client, &next.url, FETCH_TIMEOUT).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(feed = %next.url, error = %e, "fetch failed, will retry next turn");
                return Ok(CycleStats::default());
            }
        };

        let channel = match feed::parse(&bytes) {
            Ok(channel) => channel,
            Err(e) => {
                tracing::warn!(feed = %next.url, error = %e, "feed did not parse, skipping cycle");
                return Ok(CycleStats::default());
            }
        };

        let mut stats = CycleStats::default();
        for item in &channel.items {
            match ingest(&self.db, item, next.id).await {
                Ok(InsertOutcome::Inserted) => stats.inserted += 1,
                Ok(InsertOutcome::Duplicate) => stats.duplicates += 1,
                Err(e) => {
                    stats.failed_items += 1;
                    tracing::warn!(feed = %next.url, title = %item.title, error = %e, "skipping item");
                }
            }
        }

        tracing::info!(
            feed = %next.name,
            items = channel.items.len(),
            inserted = stats.inserted,
            duplicates = stats.duplicates,
            failed_items = stats.failed_items,
            "cycle complete"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FEED_BODY: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Test Feed</title>
  <item>
    <title>One</title>
    <link>https://example.com/1</link>
    <pubDate>Mon, 01 Jan 2024 00:00:00 +0000</pubDate>
  </item>
  <item>
    <title>Two</title>
    <link>https://example.com/2</link>
    <pubDate>Tue, 02 Jan 2024 00:00:00 +0000</pubDate>
  </item>
  <item>
    <title>Three</title>
    <link>https://example.com/3</link>
    <pubDate>Wed, 03 Jan 2024 00:00:00 +0000</pubDate>
  </item>
</channel></rss>"#;

    async fn scheduler_with_feed(body: &str) -> (Scheduler, Database, MockServer) {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&mock_server)
            .await;

        let db = Database::open(":memory:").await.unwrap();
        let user = db.create_user("alice").await.unwrap();
        db.create_feed("Test Feed", &format!("{}/rss", mock_server.uri()), user.id)
            .await
            .unwrap();

        let scheduler = Scheduler::new(
            db.clone(),
            crate::feed::build_client(),
            Duration::from_secs(60),
        );
        (scheduler, db, mock_server)
    }

    #[tokio::test]
    async fn test_cycle_ingests_all_items_with_correct_dates() {
        let (scheduler, db, _server) = scheduler_with_feed(FEED_BODY).await;

        let stats = scheduler.run_cycle().await.unwrap();
        assert_eq!(stats.inserted, 3);
        assert_eq!(stats.failed_items, 0);

        let user = db.get_user_by_name("alice").await.unwrap().unwrap();
        let feed = db.get_feeds().await.unwrap().remove(0);
        db.create_feed_follow(user.id, feed.id).await.unwrap();

        let posts = db.get_posts_for_user(user.id, 10).await.unwrap();
        assert_eq!(posts.len(), 3);
        // Newest first; D1 < D2 < D3 all present and linked to the feed.
        assert_eq!(posts[0].published_at, 1704240000); // Jan 3
        assert_eq!(posts[1].published_at, 1704153600); // Jan 2
        assert_eq!(posts[2].published_at, 1704067200); // Jan 1
        assert!(posts.iter().all(|p| p.feed_id == feed.id));
    }

    #[tokio::test]
    async fn test_cycle_marks_feed_polled_before_ingesting() {
        let (scheduler, db, _server) = scheduler_with_feed(FEED_BODY).await;

        scheduler.run_cycle().await.unwrap();

        let feed = db.get_feeds().await.unwrap().remove(0);
        assert!(feed.last_fetched_at.is_some());
    }

    #[tokio::test]
    async fn test_repeat_cycles_are_idempotent() {
        let (scheduler, db, _server) = scheduler_with_feed(FEED_BODY).await;

        let first = scheduler.run_cycle().await.unwrap();
        let second = scheduler.run_cycle().await.unwrap();

        assert_eq!(first.inserted, 3);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 3);
        assert_eq!(db.count_posts().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_bad_date_skips_only_that_item() {
        let body = r#"<rss><channel><title>T</title>
  <item><title>Good</title><link>https://example.com/good</link>
    <pubDate>Mon, 01 Jan 2024 00:00:00 +0000</pubDate></item>
  <item><title>Bad</title><link>https://example.com/bad</link>
    <pubDate>the day before yesterday</pubDate></item>
  <item><title>Also Good</title><link>https://example.com/also</link>
    <pubDate>Tue, 02 Jan 2024 00:00:00 +0000</pubDate></item>
</channel></rss>"#;
        let (scheduler, db, _server) = scheduler_with_feed(body).await;

        let stats = scheduler.run_cycle().await.unwrap();
        assert_eq!(stats.inserted, 2, "valid siblings still ingested");
        assert_eq!(stats.failed_items, 1);
        assert_eq!(db.count_posts().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unparseable_feed_aborts_cycle_not_loop() {
        let (scheduler, db, _server) = scheduler_with_feed("<not really xml").await;

        let stats = scheduler.run_cycle().await.unwrap();
        assert_eq!(stats, CycleStats::default());
        assert_eq!(db.count_posts().await.unwrap(), 0);

        // The feed was still marked polled, so the loop moves on.
        let feed = db.get_feeds().await.unwrap().remove(0);
        assert!(feed.last_fetched_at.is_some());
    }

    #[tokio::test]
    async fn test_fetch_failure_aborts_cycle_not_loop() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let db = Database::open(":memory:").await.unwrap();
        let user = db.create_user("alice").await.unwrap();
        db.create_feed("Down", &format!("{}/rss", mock_server.uri()), user.id)
            .await
            .unwrap();

        let scheduler = Scheduler::new(
            db.clone(),
            crate::feed::build_client(),
            Duration::from_secs(60),
        );
        let stats = scheduler.run_cycle().await.unwrap();
        assert_eq!(stats, CycleStats::default());
    }

    #[tokio::test]
    async fn test_empty_store_cycle_is_noop() {
        let db = Database::open(":memory:").await.unwrap();
        let scheduler = Scheduler::new(
            db,
            crate::feed::build_client(),
            Duration::from_secs(60),
        );
        let stats = scheduler.run_cycle().await.unwrap();
        assert_eq!(stats, CycleStats::default());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_signal() {
        let db = Database::open(":memory:").await.unwrap();
        let scheduler = Scheduler::new(
            db,
            crate::feed::build_client(),
            Duration::from_millis(10),
        );

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { scheduler.run(rx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("run() should stop promptly")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_run_terminates_when_store_fails() {
        let db = Database::open(":memory:").await.unwrap();
        let scheduler = Scheduler::new(
            db.clone(),
            crate::feed::build_client(),
            Duration::from_millis(10),
        );

        db.close().await;

        let (_tx, rx) = watch::channel(false);
        let result = tokio::time::timeout(Duration::from_secs(5), scheduler.run(rx))
            .await
            .expect("run() should terminate, not keep ticking");
        assert!(result.is_err(), "store failure is fatal");
    }
}
