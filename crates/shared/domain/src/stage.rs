use serde::{Deserialize, Serialize};

use crate::file::{File, FileState};

/// A client's atomic batch of logical paths to be brought from tape to disk.
///
/// A Stage owns its File rows outright; the Request Store is the sole
/// persistent owner of Stages, everything else only ever borrows one for
/// the duration of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub id: String,
    pub created_at: i64,
    pub started_at: i64,
    pub completed_at: i64,
    pub files: Vec<File>,
}

impl Stage {
    #[must_use]
    pub fn new(id: String, created_at: i64, files: Vec<File>) -> Self {
        let mut stage = Self { id, created_at, started_at: 0, completed_at: 0, files };
        stage.recompute_times();
        stage
    }

    /// Recomputes `started_at`/`completed_at` from the current file rows, per §3:
    /// `started_at = min(started_at)` over files that have started;
    /// `completed_at = max(finished_at)` once *all* files are terminal, else 0.
    pub fn recompute_times(&mut self) {
        self.started_at = self
            .files
            .iter()
            .filter(|f| f.started_at > 0)
            .map(|f| f.started_at)
            .min()
            .unwrap_or(0);

        self.completed_at = if !self.files.is_empty()
            && self.files.iter().all(|f| f.state.is_terminal())
        {
            self.files.iter().map(|f| f.finished_at).max().unwrap_or(0)
        } else {
            0
        };
    }

    /// True once every file row has reached a terminal state.
    #[must_use]
    pub fn is_fully_terminal(&self) -> bool {
        !self.files.is_empty() && self.files.iter().all(|f| f.state.is_terminal())
    }

    /// Hook for an expiry policy: a fully-terminal Stage older than `ttl`
    /// seconds (measured from `completed_at`) is eligible for garbage
    /// collection. No background sweeper invokes this; it is provided for a
    /// future scheduler to call.
    #[must_use]
    pub fn is_expirable(&self, now: i64, ttl_seconds: i64) -> bool {
        self.is_fully_terminal() && self.completed_at > 0 && now - self.completed_at >= ttl_seconds
    }

    /// Files whose state is `Submitted` or `Started`, in stage order.
    pub fn cancellable_files(&self) -> impl Iterator<Item = &File> {
        self.files.iter().filter(|f| f.state.is_cancellable())
    }

    /// Lookup by logical path, used by `cancel`/`release` to validate the
    /// caller-supplied path list against the stage's own files.
    #[must_use]
    pub fn find_file_by_logical_path(&self, path: &crate::path::LogicalPath) -> Option<&File> {
        self.files.iter().find(|f| &f.logical_path == path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::{LogicalPath, PhysicalPath};

    fn file(state: FileState, started_at: i64, finished_at: i64) -> File {
        File {
            logical_path: LogicalPath::new("/vo/a"),
            physical_path: PhysicalPath::new("/data/a"),
            state,
            started_at,
            finished_at,
        }
    }

    #[test]
    fn new_stage_recomputes_times() {
        let files = vec![file(FileState::Started, 10, 0), file(FileState::Submitted, 0, 0)];
        let stage = Stage::new("id".into(), 5, files);
        assert_eq!(stage.started_at, 10);
        assert_eq!(stage.completed_at, 0);
    }

    #[test]
    fn completed_at_requires_all_terminal() {
        let mut stage = Stage::new(
            "id".into(),
            0,
            vec![file(FileState::Completed, 1, 5), file(FileState::Started, 1, 0)],
        );
        assert_eq!(stage.completed_at, 0);

        stage.files[1] = file(FileState::Completed, 1, 8);
        stage.recompute_times();
        assert_eq!(stage.completed_at, 8);
    }

    #[test]
    fn is_expirable_only_after_ttl() {
        let stage = Stage::new("id".into(), 0, vec![file(FileState::Completed, 1, 100)]);
        assert!(!stage.is_expirable(150, 100));
        assert!(stage.is_expirable(200, 100));
    }

    #[test]
    fn empty_stage_is_not_expirable() {
        let stage = Stage::new("id".into(), 0, vec![]);
        assert!(!stage.is_expirable(1_000_000, 0));
    }
}
