//! Embedded SQLite-backed Request Store.
//!
//! One dedicated writer thread owns the sole writable connection and
//! serializes every mutation through a channel; a small fixed pool of
//! read-only connections serves concurrent lookups. See [`SqliteRequestStore`]
//! for the public entry point.

mod error;
mod pool;
mod pragmas;
mod store;
mod writer;

pub use error::StoreError;
pub use store::{FileDiff, RequestStore, SqliteRequestStore};
