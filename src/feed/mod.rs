//! Feed sync pipeline: staging, normalization and orchestration.
//!
//! - [`stager`] - Conditional HTTP fetch of a source into a staging file named
//!   by the hash of its URL
//! - [`normalizer`] - Parses staged bytes with `feed-rs` and sanitizes text
//! - [`sync`] - Runs staging concurrently across sources, then normalizes and
//!   ingests each staged source one at a time
//!
//! # Example
//!
//! ```ignore
//! use feedstage::feed::{build_client, Stager, SyncOptions, Syncer};
//! use tokio_util::sync::CancellationToken;
//!
//! let stager = Stager::new(build_client()?, "/tmp/feedstage");
//! let syncer = Syncer::new(db, stager, SyncOptions::default());
//! let report = syncer.sync(&sources, &CancellationToken::new()).await;
//! ```

mod normalizer;
mod stager;
mod sync;

pub use normalizer::{normalize, parse_feed, DedupStrategy, NormalizeError};
pub use stager::{
    build_client, staging_key, StageError, StageOutcome, StagedContent, Stager,
    DEFAULT_MAX_FEED_BYTES,
};
pub use sync::{
    registered_sources, SourceOutcome, SourceReport, SyncError, SyncOptions, SyncReport,
    Syncer, DEFAULT_CONCURRENCY, DEFAULT_FETCH_TIMEOUT,
};
