use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Condvar, Mutex};

use rusqlite::Connection;

use crate::error::StoreError;
use crate::pragmas::apply_pragmas;

/// A fixed-size pool of read-only SQLite connections.
///
/// Mirrors the original `SqlitePool`: every connection is opened once at
/// construction time and handed out in mutex+condvar fashion. There is no
/// dynamic growth; a pool exhausted by concurrent readers simply makes the
/// next `acquire` wait for a release.
pub struct ReadPool {
    available: Mutex<VecDeque<Connection>>,
    not_empty: Condvar,
    size: usize,
}

impl ReadPool {
    pub fn open(path: &Path, size: usize) -> Result<Self, StoreError> {
        let size = size.max(1);
        let mut connections = VecDeque::with_capacity(size);
        for _ in 0..size {
            let conn = Connection::open(path)
                .map_err(|source| StoreError::Sqlite { source, context: Some("opening read connection".into()) })?;
            apply_pragmas(&conn)?;
            connections.push_back(conn);
        }
        Ok(Self { available: Mutex::new(connections), not_empty: Condvar::new(), size })
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Blocks until a connection is free, runs `f` against it, and returns it
    /// to the pool regardless of whether `f` succeeded.
    pub fn with<T>(&self, f: impl FnOnce(&Connection) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let mut guard = self.available.lock().expect("read pool mutex poisoned");
        while guard.is_empty() {
            guard = self.not_empty.wait(guard).expect("read pool mutex poisoned");
        }
        let conn = guard.pop_front().expect("checked non-empty above");
        drop(guard);

        let result = f(&conn);

        let mut guard = self.available.lock().expect("read pool mutex poisoned");
        guard.push_back(conn);
        self.not_empty.notify_one();

        result
    }
}
