use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::normalizer::{normalize, DedupStrategy};
use super::stager::{StageError, StageOutcome, StagedContent, Stager};
use crate::storage::Database;
use crate::util::validate_url;

/// Default number of sources staged at once.
pub const DEFAULT_CONCURRENCY: usize = 8;
/// Default per-source staging timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Store setting recording the dedup strategy entries were keyed with.
const DEDUP_SETTING: &str = "sync.dedup";

/// Errors that stop a sync pass before any source is fetched.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Entries already stored were keyed by another strategy; syncing now
    /// would store every one of them a second time
    #[error("Stored entries use dedup strategy \"{stored}\" but \"{configured}\" is configured")]
    DedupMismatch { stored: String, configured: String },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Tuning knobs for a sync pass.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Maximum number of staging tasks in flight
    pub concurrency: usize,
    /// Upper bound on one source's staging, independent of cancellation
    pub fetch_timeout: Duration,
    pub dedup: DedupStrategy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            dedup: DedupStrategy::default(),
        }
    }
}

/// What happened to one source during a sync pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceOutcome {
    /// Fetched, parsed and stored
    Staged { feed_id: i64, new_entries: usize },
    /// Server answered 304; nothing changed
    NotModified,
    /// Request, status, size or staging I/O failure
    FetchFailed { error: String },
    /// Staged bytes were not a valid feed
    ParseFailed { error: String },
    /// The store rejected the ingestion; nothing from this source was kept
    StoreFailed { error: String },
    /// The pass was interrupted before this source finished staging
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source: String,
    #[serde(flatten)]
    pub outcome: SourceOutcome,
}

/// Per-source result of [`Syncer::sync`], in source-list order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub sources: Vec<SourceReport>,
    /// True when the cancellation token fired during the staging phase
    pub interrupted: bool,
}

impl SyncReport {
    pub fn outcome(&self, source: &str) -> Option<&SourceOutcome> {
        self.sources
            .iter()
            .find(|r| r.source == source)
            .map(|r| &r.outcome)
    }

    /// Total entries inserted across all sources
    pub fn new_entries(&self) -> usize {
        self.sources
            .iter()
            .map(|r| match r.outcome {
                SourceOutcome::Staged { new_entries, .. } => new_entries,
                _ => 0,
            })
            .sum()
    }

    /// Sources that failed to fetch, parse or store
    pub fn failures(&self) -> usize {
        self.sources
            .iter()
            .filter(|r| {
                matches!(
                    r.outcome,
                    SourceOutcome::FetchFailed { .. }
                        | SourceOutcome::ParseFailed { .. }
                        | SourceOutcome::StoreFailed { .. }
                )
            })
            .count()
    }
}

/// Drives a sync pass: concurrent staging, then sequential ingestion.
///
/// The syncer owns the store handle for the duration of a pass and is its
/// only writer.
pub struct Syncer {
    db: Database,
    stager: Stager,
    options: SyncOptions,
}

impl Syncer {
    pub fn new(db: Database, stager: Stager, options: SyncOptions) -> Self {
        Self {
            db,
            stager,
            options,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Ties the store to the configured dedup strategy on first use and
    /// refuses any other strategy afterwards.
    pub async fn check_dedup_strategy(&self) -> Result<(), SyncError> {
        let configured = self.options.dedup.as_str();
        let stored = self.db.pin_setting(DEDUP_SETTING, configured).await?;
        if stored != configured {
            return Err(SyncError::DedupMismatch {
                stored,
                configured: configured.to_string(),
            });
        }
        Ok(())
    }

    /// Syncs every registered source once.
    ///
    /// # Behavior
    ///
    /// - Blank sources are skipped, duplicates collapse to their first occurrence
    /// - Up to `concurrency` sources are staged at once, each bounded by
    ///   `fetch_timeout` and all sharing `cancel`
    /// - Ingestion starts only after every staging task has settled and runs
    ///   one source at a time in source-list order
    /// - Sources staged before `cancel` fired are still ingested
    /// - No source's failure stops the others
    /// - If the store was keyed with a different [`DedupStrategy`], nothing is
    ///   fetched and every source reports `StoreFailed`
    pub async fn sync(&self, sources: &[String], cancel: &CancellationToken) -> SyncReport {
        let sources = registered_sources(sources);
        if sources.is_empty() {
            tracing::warn!("No sources registered, nothing to sync");
            return SyncReport::default();
        }

        if let Err(e) = self.check_dedup_strategy().await {
            tracing::error!(error = %e, "Refusing to sync");
            let error = e.to_string();
            return SyncReport {
                sources: sources
                    .into_iter()
                    .map(|source| SourceReport {
                        source,
                        outcome: SourceOutcome::StoreFailed {
                            error: error.clone(),
                        },
                    })
                    .collect(),
                interrupted: false,
            };
        }

        if let Err(e) = self.stager.purge_stale().await {
            tracing::warn!(dir = %self.stager.dir().display(), error = %e, "Failed to purge stale staging artifacts");
        }

        tracing::info!(
            sources = sources.len(),
            concurrency = self.options.concurrency,
            "Staging sources"
        );

        let staged: Vec<(String, Result<StageOutcome, StageError>)> = stream::iter(sources)
            .map(|source| async move {
                let result = self.stage_one(&source, cancel).await;
                (source, result)
            })
            .buffered(self.options.concurrency.max(1))
            .collect()
            .await;

        let interrupted = cancel.is_cancelled();
        if interrupted {
            tracing::warn!("Sync interrupted, ingesting sources staged before the interrupt");
        }

        tracing::info!("Ingesting staged sources");
        let mut reports = Vec::with_capacity(staged.len());
        for (source, result) in staged {
            let outcome = match result {
                Ok(StageOutcome::Staged(content)) => self.ingest(&content).await,
                Ok(StageOutcome::NotModified) => {
                    tracing::info!(source = %source, "Not modified");
                    SourceOutcome::NotModified
                }
                Err(StageError::Cancelled) => {
                    tracing::info!(source = %source, "Sync cancelled for source");
                    SourceOutcome::Cancelled
                }
                Err(e) => {
                    tracing::warn!(source = %source, error = %e, "Failed to fetch source");
                    SourceOutcome::FetchFailed {
                        error: e.to_string(),
                    }
                }
            };
            reports.push(SourceReport { source, outcome });
        }

        let report = SyncReport {
            sources: reports,
            interrupted,
        };
        tracing::info!(
            sources = report.sources.len(),
            new_entries = report.new_entries(),
            failures = report.failures(),
            interrupted = report.interrupted,
            "Sync finished"
        );
        report
    }

    async fn stage_one(
        &self,
        source: &str,
        cancel: &CancellationToken,
    ) -> Result<StageOutcome, StageError> {
        if cancel.is_cancelled() {
            return Err(StageError::Cancelled);
        }

        let last_synced = match self.db.get_feed_by_url(source).await {
            Ok(feed) => feed.and_then(|f| f.last_updated),
            Err(e) => {
                // An unconditional fetch is still correct, just not cheaper
                tracing::warn!(source = %source, error = %e, "Failed to look up last sync time");
                None
            }
        };

        self.stager
            .stage_with_cancel(source, last_synced, cancel, self.options.fetch_timeout)
            .await
    }

    async fn ingest(&self, content: &StagedContent) -> SourceOutcome {
        let feed = match normalize(content, self.options.dedup).await {
            Ok(feed) => feed,
            Err(e) => {
                tracing::warn!(source = %content.source, error = %e, "Failed to parse feed");
                return SourceOutcome::ParseFailed {
                    error: e.to_string(),
                };
            }
        };

        match self.db.ingest(&feed, content.fetched_at).await {
            Ok((feed_id, new_entries)) => {
                tracing::info!(
                    source = %content.source,
                    feed_id = feed_id,
                    entries = feed.entries.len(),
                    new_entries = new_entries,
                    "Feed updated"
                );
                SourceOutcome::Staged {
                    feed_id,
                    new_entries,
                }
            }
            Err(e) => {
                tracing::warn!(source = %content.source, error = %e, "Failed to store feed");
                SourceOutcome::StoreFailed {
                    error: e.to_string(),
                }
            }
        }
    }
}

/// Trims sources, drops blank and duplicate ones, keeps first-seen order.
///
/// Sources that are not http(s) URLs are kept; they fail at staging time and
/// show up in the report instead of vanishing silently.
pub fn registered_sources(sources: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    sources
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.to_string()))
        .inspect(|s| {
            if let Err(e) = validate_url(s) {
                tracing::warn!(source = %s, error = %e, "Source does not look like a feed URL");
            }
        })
        .map(str::to_string)
        .collect()
}
