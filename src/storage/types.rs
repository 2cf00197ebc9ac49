use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds a lock on the database file
    #[error("The feed database is locked by another process. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) all surface as
/// one of these messages.
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Store Input
// ============================================================================

/// A normalized feed ready for ingestion
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    /// Identity URL; always the registered source URL
    pub url: String,
    pub title: String,
    pub description: String,
    /// Entries in document order
    pub entries: Vec<ParsedEntry>,
}

/// A normalized entry ready for ingestion
#[derive(Debug, Clone)]
pub struct ParsedEntry {
    /// Per-feed deduplication key (see `DedupStrategy`)
    pub dedup_key: String,
    pub url: Option<String>,
    pub title: String,
    pub description: String,
    pub content: String,
    /// Unix seconds
    pub published: Option<i64>,
}

// ============================================================================
// Data Structures
// ============================================================================

/// Feed row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Feed {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub description: String,
    /// Unix seconds of the last successful sync, used for conditional GETs
    pub last_updated: Option<i64>,
}

/// Entry row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Entry {
    pub id: i64,
    pub feed_id: i64,
    #[serde(skip)]
    pub dedup_key: String,
    pub url: Option<String>,
    pub title: String,
    pub description: String,
    pub content: String,
    pub date_published: Option<i64>,
    pub read: bool,
}
