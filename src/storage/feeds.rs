use anyhow::Result;
use sqlx::SqliteConnection;

use super::entries::upsert_entries_on;
use super::schema::Database;
use super::types::{Feed, ParsedFeed};

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Resolve a feed to its row id, inserting it if the URL is new.
    ///
    /// An existing row is returned unchanged: title and description are only
    /// written on first sight of a URL.
    pub async fn upsert_feed(&self, feed: &ParsedFeed) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        upsert_feed_on(&mut conn, feed).await
    }

    /// Record the time of the most recent successful sync for a feed
    pub async fn touch_last_synced(&self, feed_id: i64, timestamp: i64) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        touch_last_synced_on(&mut conn, feed_id, timestamp).await
    }

    /// Store one normalized feed in a single transaction.
    ///
    /// Runs [`upsert_feed`](Self::upsert_feed), then
    /// [`upsert_entries`](Self::upsert_entries), then
    /// [`touch_last_synced`](Self::touch_last_synced). A failure at any step
    /// rolls back the whole source, so `last_updated` never advances past
    /// entries that were not stored.
    ///
    /// # Returns
    ///
    /// `(feed_id, new_entries)`
    pub async fn ingest(&self, feed: &ParsedFeed, synced_at: i64) -> Result<(i64, usize)> {
        let mut tx = self.pool.begin().await?;

        let feed_id = upsert_feed_on(&mut tx, feed).await?;
        let inserted = upsert_entries_on(&mut tx, feed_id, &feed.entries).await?;
        touch_last_synced_on(&mut tx, feed_id, synced_at).await?;

        tx.commit().await?;
        Ok((feed_id, inserted))
    }

    // ========================================================================
    // Feed Queries
    // ========================================================================

    /// All feeds in insertion order
    pub async fn list_feeds(&self) -> Result<Vec<Feed>> {
        let feeds = sqlx::query_as::<_, Feed>(
            "SELECT id, url, title, description, last_updated FROM feeds ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    /// Look up a feed by its identity URL
    pub async fn get_feed_by_url(&self, url: &str) -> Result<Option<Feed>> {
        let feed = sqlx::query_as::<_, Feed>(
            "SELECT id, url, title, description, last_updated FROM feeds WHERE url = ?",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(feed)
    }
}

pub(super) async fn upsert_feed_on(conn: &mut SqliteConnection, feed: &ParsedFeed) -> Result<i64> {
    let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM feeds WHERE url = ?")
        .bind(&feed.url)
        .fetch_optional(&mut *conn)
        .await?;

    if let Some((id,)) = existing {
        tracing::debug!(feed_id = id, url = %feed.url, "Feed already stored");
        return Ok(id);
    }

    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO feeds (url, title, description) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(&feed.url)
    .bind(&feed.title)
    .bind(&feed.description)
    .fetch_one(&mut *conn)
    .await?;

    tracing::info!(feed_id = id, url = %feed.url, title = %feed.title, "Added new feed");
    Ok(id)
}

pub(super) async fn touch_last_synced_on(
    conn: &mut SqliteConnection,
    feed_id: i64,
    timestamp: i64,
) -> Result<()> {
    sqlx::query("UPDATE feeds SET last_updated = ? WHERE id = ?")
        .bind(timestamp)
        .bind(feed_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
