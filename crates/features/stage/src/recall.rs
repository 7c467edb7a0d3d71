use std::sync::Arc;

use storm_tape_database::{RequestStore, StoreError};
use storm_tape_domain::PhysicalPath;

/// Thin wrapper over the take-over and in-progress queries a recall agent
/// polls (§4.5). Range validation of `n`/`limit` against configured bounds
/// belongs to the HTTP layer, which is the one place that knows the
/// configured ceilings and how to report a violation.
pub struct RecallHandoff {
    store: Arc<dyn RequestStore>,
}

impl std::fmt::Debug for RecallHandoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecallHandoff").finish_non_exhaustive()
    }
}

impl RecallHandoff {
    #[must_use]
    pub fn new(store: Arc<dyn RequestStore>) -> Self {
        Self { store }
    }

    /// Count of file rows currently eligible for take-over.
    pub fn ready_take_over(&self) -> Result<u64, StoreError> {
        self.store.count_recallable()
    }

    /// Selects and reserves up to `n` eligible physical paths, marking each
    /// with the in-progress sentinel as it is claimed.
    pub fn take_over(&self, n: usize) -> Result<Vec<PhysicalPath>, StoreError> {
        self.store.take_recallable(n)
    }

    /// Physical paths currently believed to be in progress.
    pub fn in_progress(&self, limit: usize, precise: bool) -> Result<Vec<PhysicalPath>, StoreError> {
        self.store.in_progress(limit, precise)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storm_tape_storage::FakeStorage;

    fn handoff() -> (tempfile::TempDir, RecallHandoff) {
        let dir = tempfile::tempdir().unwrap();
        let probe = Arc::new(FakeStorage::new());
        let store = Arc::new(
            storm_tape_database::SqliteRequestStore::open(&dir.path().join("db.sqlite"), 2, probe).unwrap(),
        );
        (dir, RecallHandoff::new(store))
    }

    #[test]
    fn empty_store_has_nothing_ready() {
        let (_dir, handoff) = handoff();
        assert_eq!(handoff.ready_take_over().unwrap(), 0);
        assert!(handoff.take_over(5).unwrap().is_empty());
        assert!(handoff.in_progress(5, false).unwrap().is_empty());
    }
}
