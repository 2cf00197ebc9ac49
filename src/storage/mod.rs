//! Feed store: durable SQLite storage of feeds and entries.
//!
//! The store is the only shared mutable resource of a sync pass. The
//! orchestrator is its single writer; readers may use clones of the handle
//! concurrently.

mod entries;
mod feeds;
mod schema;
mod settings;
mod types;

pub use schema::{Database, IN_MEMORY};
pub use types::{DatabaseError, Entry, Feed, ParsedEntry, ParsedFeed};
