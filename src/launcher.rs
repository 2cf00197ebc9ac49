//! Hands entry URLs to an external browser or media player.
//!
//! The engine never decides how a program is invoked. It resolves an entry's
//! link and the configured program name into a [`LaunchRequest`] and passes
//! that to a [`Launcher`].

use serde::Deserialize;
use thiserror::Error;

use crate::storage::Database;
use crate::util::{validate_url, UrlValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchTarget {
    Browser,
    Player,
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Entry {0} not found")]
    EntryNotFound(i64),

    #[error("Entry {0} has no link")]
    MissingUrl(i64),

    #[error("Refusing to open URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),

    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Database(#[from] anyhow::Error),
}

/// A resolved request to open one URL with one program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub target: LaunchTarget,
    /// Validated http(s) URL
    pub url: String,
    pub program: String,
}

impl LaunchRequest {
    /// Builds a request for `url`, refusing anything that is not http(s).
    pub fn new(
        target: LaunchTarget,
        url: &str,
        program: impl Into<String>,
    ) -> Result<Self, LaunchError> {
        let url = validate_url(url)?;
        Ok(Self {
            target,
            url: url.to_string(),
            program: program.into(),
        })
    }

    /// Resolves the link of a stored entry.
    ///
    /// # Errors
    ///
    /// - [`LaunchError::EntryNotFound`] - No entry with that id
    /// - [`LaunchError::MissingUrl`] - The entry carries no link
    /// - [`LaunchError::InvalidUrl`] - The link is not an http(s) URL
    pub async fn for_entry(
        db: &Database,
        entry_id: i64,
        target: LaunchTarget,
        program: impl Into<String>,
    ) -> Result<Self, LaunchError> {
        let entry = db
            .get_entry(entry_id)
            .await?
            .ok_or(LaunchError::EntryNotFound(entry_id))?;

        let url = entry
            .url
            .filter(|u| !u.trim().is_empty())
            .ok_or(LaunchError::MissingUrl(entry_id))?;

        Self::new(target, &url, program)
    }
}

/// Something that can open a URL with an external program.
pub trait Launcher {
    fn launch(&self, request: &LaunchRequest) -> Result<(), LaunchError>;
}

/// Spawns the configured program detached from this process.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

impl Launcher for ProcessLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<(), LaunchError> {
        tracing::info!(
            program = %request.program,
            url = %request.url,
            target = ?request.target,
            "Launching"
        );
        open::with_detached(&request.url, request.program.clone()).map_err(|source| {
            LaunchError::Spawn {
                program: request.program.clone(),
                source,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ParsedEntry, ParsedFeed};
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingLauncher {
        launched: Mutex<Vec<LaunchRequest>>,
    }

    impl Launcher for RecordingLauncher {
        fn launch(&self, request: &LaunchRequest) -> Result<(), LaunchError> {
            self.launched.lock().unwrap().push(request.clone());
            Ok(())
        }
    }

    async fn db_with_entries() -> (Database, Vec<i64>) {
        let db = Database::open(":memory:").await.unwrap();
        let entry = |key: &str, url: Option<&str>| ParsedEntry {
            dedup_key: key.to_string(),
            url: url.map(str::to_string),
            title: key.to_string(),
            description: String::new(),
            content: String::new(),
            published: None,
        };
        let feed = ParsedFeed {
            url: "https://example.com/rss".to_string(),
            title: "Example".to_string(),
            description: String::new(),
            entries: vec![
                entry("web", Some("https://example.com/post")),
                entry("none", None),
                entry("local", Some("file:///etc/passwd")),
            ],
        };
        let (feed_id, _) = db.ingest(&feed, 0).await.unwrap();
        let ids = db
            .list_entries(feed_id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        (db, ids)
    }

    #[tokio::test]
    async fn test_for_entry_resolves_url_and_program() {
        let (db, ids) = db_with_entries().await;

        let request = LaunchRequest::for_entry(&db, ids[0], LaunchTarget::Player, "mpv")
            .await
            .unwrap();

        let launcher = RecordingLauncher::default();
        launcher.launch(&request).unwrap();

        let launched = launcher.launched.lock().unwrap();
        assert_eq!(
            *launched,
            vec![LaunchRequest {
                target: LaunchTarget::Player,
                url: "https://example.com/post".to_string(),
                program: "mpv".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_for_entry_errors() {
        let (db, ids) = db_with_entries().await;

        let missing = LaunchRequest::for_entry(&db, 9999, LaunchTarget::Browser, "firefox").await;
        assert!(matches!(missing, Err(LaunchError::EntryNotFound(9999))));

        let no_url = LaunchRequest::for_entry(&db, ids[1], LaunchTarget::Browser, "firefox").await;
        assert!(matches!(no_url, Err(LaunchError::MissingUrl(_))));

        let local = LaunchRequest::for_entry(&db, ids[2], LaunchTarget::Browser, "firefox").await;
        assert!(matches!(local, Err(LaunchError::InvalidUrl(_))));
    }

    #[test]
    fn test_new_refuses_non_http_schemes() {
        for url in ["javascript:alert(1)", "ftp://example.com/", "not a url"] {
            assert!(
                LaunchRequest::new(LaunchTarget::Browser, url, "firefox").is_err(),
                "{url} should be refused"
            );
        }
    }
}
