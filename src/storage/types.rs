use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised by the feed store.
///
/// Everything here is non-recoverable from the scheduler's point of view
/// when it comes out of the scheduler's own store calls; the ingestion
/// step wraps it per item instead.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Migration failed
    #[error("database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

// ============================================================================
// Data Structures
// ============================================================================

/// A registered user.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub name: String,
}

/// A subscribed feed.
///
/// `last_fetched_at` is null until the first poll, then monotonically
/// non-decreasing (the scheduler always stamps the current time).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Feed {
    pub id: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub name: String,
    pub url: String,
    pub user_id: i64,
    pub last_fetched_at: Option<i64>,
}

/// A user-follows-feed relationship, unique on (user, feed).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FeedFollow {
    pub id: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub user_id: i64,
    pub feed_id: i64,
}

/// A post discovered from a feed, deduplicated globally by URL.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Post {
    pub id: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub published_at: i64,
    pub feed_id: i64,
}

/// Insert payload for a post.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub published_at: i64,
    pub feed_id: i64,
}

/// Result of a post insert.
///
/// `Duplicate` means the post URL already exists somewhere in the store.
/// That is the expected dedupe path, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}
