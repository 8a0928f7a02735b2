use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;

use crate::feed::FeedItem;
use crate::storage::{Database, InsertOutcome, NewPost, StoreError};

/// Publish-date layout used by feeds that don't speak RFC 2822.
const LEGACY_DATE_LAYOUT: &str = "%d/%m/%Y %H:%M:%S";

/// Errors scoped to a single item. The scheduler skips the item, logs,
/// and keeps going; nothing here stops the loop or its sibling items.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The item's publish date matched none of the accepted layouts.
    #[error("unparseable publish date {0:?}")]
    BadDate(String),

    /// The item has no link, so there is no dedupe key to insert under.
    #[error("item {0:?} has no link")]
    MissingLink(String),

    /// The store rejected this item's insert for a reason other than a
    /// duplicate URL.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Turn one normalized item into a persisted post.
///
/// A uniqueness violation on the post URL is the expected dedupe path and
/// comes back as `Duplicate`, not an error.
pub async fn ingest(
    db: &Database,
    item: &FeedItem,
    feed_id: i64,
) -> Result<InsertOutcome, IngestError> {
    if item.link.is_empty() {
        return Err(IngestError::MissingLink(item.title.clone()));
    }

    let published_at = parse_pub_date(&item.pub_date)?;

    let post = NewPost {
        title: item.title.clone(),
        url: item.link.clone(),
        description: (!item.description.is_empty()).then(|| item.description.clone()),
        published_at: published_at.timestamp(),
        feed_id,
    };

    let outcome = db.insert_post(&post).await?;
    if outcome == InsertOutcome::Duplicate {
        tracing::debug!(url = %post.url, "post already ingested, skipping");
    }
    Ok(outcome)
}

/// Parse a raw publish-date string.
///
/// RFC 2822 is the RSS convention and is tried first; the day-first
/// legacy layout (`02/01/2006 15:04:05`, read as UTC) covers the rest.
fn parse_pub_date(raw: &str) -> Result<DateTime<Utc>, IngestError> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, LEGACY_DATE_LAYOUT) {
        return Ok(naive.and_utc());
    }
    Err(IngestError::BadDate(raw.to_string()))
}
