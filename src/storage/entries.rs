use anyhow::Result;
use sqlx::SqliteConnection;

use super::schema::Database;
use super::types::{Entry, ParsedEntry};

impl Database {
    // ========================================================================
    // Entry Operations
    // ========================================================================

    /// Insert the entries not yet stored for a feed, returns the number inserted
    ///
    /// Entries are processed in document order. An entry whose
    /// `(feed_id, dedup_key)` pair already exists is skipped; stored rows are
    /// never overwritten, so read-state and content survive re-syncs.
    pub async fn upsert_entries(&self, feed_id: i64, entries: &[ParsedEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let inserted = upsert_entries_on(&mut tx, feed_id, entries).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    /// Mark entry as read (idempotent), returns whether it was changed
    pub async fn mark_read(&self, entry_id: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE entries SET read = 1 WHERE id = ? AND read = 0")
            .bind(entry_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Entry Queries
    // ========================================================================

    /// Entries for a feed in insertion order
    pub async fn list_entries(&self, feed_id: i64) -> Result<Vec<Entry>> {
        let entries = sqlx::query_as::<_, Entry>(
            r#"
            SELECT id, feed_id, dedup_key, url, title, description, content,
                   date_published, read
            FROM entries
            WHERE feed_id = ?
            ORDER BY id
        "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Get a single entry by its ID.
    pub async fn get_entry(&self, entry_id: i64) -> Result<Option<Entry>> {
        let entry = sqlx::query_as::<_, Entry>(
            r#"
            SELECT id, feed_id, dedup_key, url, title, description, content,
                   date_published, read
            FROM entries
            WHERE id = ?
        "#,
        )
        .bind(entry_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    /// Number of stored entries for a feed
    pub async fn count_entries(&self, feed_id: i64) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM entries WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

pub(super) async fn upsert_entries_on(
    conn: &mut SqliteConnection,
    feed_id: i64,
    entries: &[ParsedEntry],
) -> Result<usize> {
    let mut inserted = 0;

    for entry in entries {
        let result = sqlx::query(
            r#"
            INSERT INTO entries
                (feed_id, dedup_key, url, title, description, content, date_published)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(feed_id, dedup_key) DO NOTHING
        "#,
        )
        .bind(feed_id)
        .bind(&entry.dedup_key)
        .bind(&entry.url)
        .bind(&entry.title)
        .bind(&entry.description)
        .bind(&entry.content)
        .bind(entry.published)
        .execute(&mut *conn)
        .await?;

        inserted += result.rows_affected() as usize;
    }

    tracing::debug!(
        feed_id = feed_id,
        candidates = entries.len(),
        inserted = inserted,
        "Upserted entries"
    );
    Ok(inserted)
}
