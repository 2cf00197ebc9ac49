use feed_rs::parser;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::stager::StagedContent;
use crate::storage::{ParsedEntry, ParsedFeed};
use crate::util::sanitize_text;

/// Errors that can occur while normalizing a staged source.
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// The staged artifact could not be read back
    #[error("Failed to read staged content: {0}")]
    Io(#[from] std::io::Error),
    /// The bytes are not a valid RSS, Atom or JSON feed
    #[error("Parse error: {0}")]
    Parse(#[from] parser::ParseFeedError),
}

/// How entries of one feed are told apart when deciding whether to insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupStrategy {
    /// GUID if present, else entry URL, else a hash of title and publish time
    #[default]
    Identity,
    /// Publish time only; entries sharing a timestamp collapse into one
    Published,
}

impl DedupStrategy {
    /// Name as written in the config file.
    pub fn as_str(self) -> &'static str {
        match self {
            DedupStrategy::Identity => "identity",
            DedupStrategy::Published => "published",
        }
    }
}

/// Parses a staged artifact into a normalized feed, then deletes the artifact.
///
/// The artifact is removed whether parsing succeeds or fails. On failure no
/// entries are returned at all.
pub async fn normalize(
    staged: &StagedContent,
    strategy: DedupStrategy,
) -> Result<ParsedFeed, NormalizeError> {
    let result = match tokio::fs::read(&staged.path).await {
        Ok(bytes) => parse_feed(&staged.source, &bytes, strategy).map_err(NormalizeError::from),
        Err(e) => Err(NormalizeError::Io(e)),
    };

    if let Err(e) = tokio::fs::remove_file(&staged.path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %staged.path.display(), error = %e, "Failed to remove staged artifact");
        }
    }

    result
}

/// Parses RSS/Atom/JSON feed bytes fetched from `source`.
///
/// The feed's identity URL is always `source`, whatever the document claims.
/// Every text field goes through [`sanitize_text`].
pub fn parse_feed(
    source: &str,
    bytes: &[u8],
    strategy: DedupStrategy,
) -> Result<ParsedFeed, parser::ParseFeedError> {
    // feed-rs invents an id for items without one; keep it empty instead so
    // the link and hash fallbacks below decide identity
    let feed = parser::Builder::new()
        .id_generator(|_, _, _| String::new())
        .build()
        .parse(bytes)?;

    let entries = feed
        .entries
        .into_iter()
        .map(|entry| {
            let url = entry.links.first().map(|l| l.href.clone());
            let published = entry.published.or(entry.updated).map(|dt| dt.timestamp());
            let title = entry
                .title
                .map(|t| sanitize_text(&t.content))
                .unwrap_or_default();
            let description = entry
                .summary
                .map(|s| sanitize_text(&s.content))
                .unwrap_or_default();
            let content = entry
                .content
                .and_then(|c| c.body)
                .map(|body| sanitize_text(&body))
                .unwrap_or_default();

            let dedup_key = dedup_key(strategy, &entry.id, url.as_deref(), &title, published);

            ParsedEntry {
                dedup_key,
                url,
                title,
                description,
                content,
                published,
            }
        })
        .collect();

    Ok(ParsedFeed {
        url: source.to_string(),
        title: feed
            .title
            .map(|t| sanitize_text(&t.content))
            .unwrap_or_default(),
        description: feed
            .description
            .map(|d| sanitize_text(&d.content))
            .unwrap_or_default(),
        entries,
    })
}

fn dedup_key(
    strategy: DedupStrategy,
    guid: &str,
    url: Option<&str>,
    title: &str,
    published: Option<i64>,
) -> String {
    let published = published.map(|p| p.to_string()).unwrap_or_default();

    match strategy {
        DedupStrategy::Published => published,
        DedupStrategy::Identity => {
            let guid = guid.trim();
            if !guid.is_empty() {
                return guid.to_string();
            }
            if let Some(url) = url.map(str::trim).filter(|u| !u.is_empty()) {
                return url.to_string();
            }
            let hash = Sha256::digest(format!("{}|{}", title, published).as_bytes());
            format!("{:x}", hash)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    const SOURCE: &str = "https://registered.example.com/rss";

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel>
    <title>Café &amp;amp; Bar</title>
    <link>https://elsewhere.example.com/</link>
    <description>Notes &amp;lt;daily&amp;gt;</description>
    <item>
        <guid>post-1</guid>
        <title>Café déjà vu</title>
        <link>https://registered.example.com/posts/1</link>
        <description>First</description>
        <pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate>
    </item>
    <item>
        <guid>post-2</guid>
        <title>Second</title>
        <link>https://registered.example.com/posts/2</link>
        <pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate>
    </item>
</channel></rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
    <title>Atom Feed</title>
    <id>urn:uuid:feed</id>
    <updated>2024-01-02T00:00:00Z</updated>
    <entry>
        <id>urn:uuid:entry-1</id>
        <title>Atom Entry</title>
        <link href="https://example.com/atom/1"/>
        <updated>2024-01-02T00:00:00Z</updated>
        <summary>Summary text</summary>
        <content type="text">Body text</content>
    </entry>
</feed>"#;

    fn write_staged(dir: &Path, body: &str) -> StagedContent {
        let path = dir.join("artifact.tmp");
        std::fs::write(&path, body).unwrap();
        StagedContent {
            source: SOURCE.to_string(),
            path,
            fetched_at: 0,
            size: body.len() as u64,
        }
    }

    #[test]
    fn test_parse_rss_sanitizes_text_and_forces_source_url() {
        let feed = parse_feed(SOURCE, RSS.as_bytes(), DedupStrategy::Identity).unwrap();

        assert_eq!(feed.url, SOURCE);
        assert_eq!(feed.title, "Caf  & Bar");
        assert_eq!(feed.description, "Notes <daily>");
        assert_eq!(feed.entries.len(), 2);

        let first = &feed.entries[0];
        assert_eq!(first.title, "Caf  d j  vu");
        assert_eq!(first.description, "First");
        assert_eq!(
            first.url.as_deref(),
            Some("https://registered.example.com/posts/1")
        );
        assert_eq!(first.published, Some(1704067200));
        assert_eq!(first.dedup_key, "post-1");
    }

    #[test]
    fn test_parse_atom() {
        let feed = parse_feed(SOURCE, ATOM.as_bytes(), DedupStrategy::Identity).unwrap();

        assert_eq!(feed.url, SOURCE);
        assert_eq!(feed.title, "Atom Feed");
        let entry = &feed.entries[0];
        assert_eq!(entry.title, "Atom Entry");
        assert_eq!(entry.description, "Summary text");
        assert_eq!(entry.content, "Body text");
        assert_eq!(entry.url.as_deref(), Some("https://example.com/atom/1"));
        // No <published>, falls back to <updated>
        assert_eq!(entry.published, Some(1704153600));
    }

    #[test]
    fn test_entries_keep_document_order() {
        let feed = parse_feed(SOURCE, RSS.as_bytes(), DedupStrategy::Identity).unwrap();
        let titles: Vec<_> = feed.entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, ["Caf  d j  vu", "Second"]);
    }

    #[test]
    fn test_published_strategy_collides_on_same_timestamp() {
        let feed = parse_feed(SOURCE, RSS.as_bytes(), DedupStrategy::Published).unwrap();
        assert_eq!(feed.entries[0].dedup_key, "1704067200");
        assert_eq!(feed.entries[0].dedup_key, feed.entries[1].dedup_key);
    }

    #[test]
    fn test_identity_strategy_separates_same_timestamp() {
        let feed = parse_feed(SOURCE, RSS.as_bytes(), DedupStrategy::Identity).unwrap();
        assert_ne!(feed.entries[0].dedup_key, feed.entries[1].dedup_key);
    }

    #[test]
    fn test_dedup_key_fallbacks() {
        let s = DedupStrategy::Identity;
        assert_eq!(
            dedup_key(s, " guid ", Some("https://a"), "t", Some(1)),
            "guid"
        );
        assert_eq!(dedup_key(s, "", Some("https://a"), "t", Some(1)), "https://a");

        let hashed = dedup_key(s, "", None, "t", Some(1));
        assert_eq!(hashed.len(), 64);
        assert_eq!(hashed, dedup_key(s, "  ", Some(" "), "t", Some(1)));
        assert_ne!(hashed, dedup_key(s, "", None, "t", Some(2)));
    }

    #[test]
    fn test_item_without_guid_is_keyed_by_link() {
        let doc = |title: &str| {
            format!(
                r#"<rss version="2.0"><channel><title>T</title>
                <item><title>{title}</title><link>https://ex.com/p/1</link></item>
                </channel></rss>"#
            )
        };

        let before = parse_feed(SOURCE, doc("Hello").as_bytes(), DedupStrategy::Identity).unwrap();
        let after = parse_feed(
            SOURCE,
            doc("Hello (updated)").as_bytes(),
            DedupStrategy::Identity,
        )
        .unwrap();

        assert_eq!(before.entries[0].dedup_key, "https://ex.com/p/1");
        assert_eq!(after.entries[0].dedup_key, before.entries[0].dedup_key);
    }

    #[test]
    fn test_item_without_guid_or_link_is_keyed_by_hash() {
        let doc = r#"<rss version="2.0"><channel><title>T</title>
            <item><title>Bare</title><pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate></item>
            </channel></rss>"#;

        let feed = parse_feed(SOURCE, doc.as_bytes(), DedupStrategy::Identity).unwrap();
        assert_eq!(
            feed.entries[0].dedup_key,
            dedup_key(DedupStrategy::Identity, "", None, "Bare", Some(1704067200))
        );
    }

    #[test]
    fn test_malformed_document_is_error() {
        let result = parse_feed(SOURCE, b"<not valid xml", DedupStrategy::Identity);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_normalize_removes_artifact_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let staged = write_staged(dir.path(), RSS);

        let feed = normalize(&staged, DedupStrategy::Identity).await.unwrap();

        assert_eq!(feed.entries.len(), 2);
        assert!(!staged.path.exists());
    }

    #[tokio::test]
    async fn test_normalize_removes_artifact_on_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        let staged = write_staged(dir.path(), "<not valid xml");

        let result = normalize(&staged, DedupStrategy::Identity).await;

        assert!(matches!(result, Err(NormalizeError::Parse(_))));
        assert!(!staged.path.exists());
    }

    #[tokio::test]
    async fn test_normalize_missing_artifact_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let staged = StagedContent {
            source: SOURCE.to_string(),
            path: dir.path().join("gone.tmp"),
            fetched_at: 0,
            size: 0,
        };

        let result = normalize(&staged, DedupStrategy::Identity).await;
        assert!(matches!(result, Err(NormalizeError::Io(_))));
    }
}
