//! Headless RSS/Atom sync engine.
//!
//! Sources are staged concurrently to disk, normalized, and ingested into a
//! SQLite store one at a time. See [`feed::Syncer`] for the pipeline and
//! [`storage::Database`] for the read API.

pub mod config;
pub mod feed;
pub mod launcher;
pub mod storage;
pub mod util;
