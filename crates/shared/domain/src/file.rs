use serde::{Deserialize, Serialize};

use crate::path::{LogicalPath, PhysicalPath};

/// The state of one file within a stage request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Submitted,
    Started,
    Completed,
    Cancelled,
    Failed,
}

impl FileState {
    /// True for `Completed`, `Cancelled`, and `Failed` — states the
    /// Lifecycle Engine never transitions out of.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// True for `Submitted` and `Started` — states `cancel`/`release` act on.
    #[must_use]
    pub const fn is_cancellable(self) -> bool {
        matches!(self, Self::Submitted | Self::Started)
    }
}

/// One file row belonging to a [`crate::Stage`].
///
/// Invariants (§3): a `Submitted` file has both timestamps zero; a `Started`
/// file has `started_at > 0` and `finished_at == 0`; a terminal file has
/// `finished_at >= started_at > 0`, except a `Cancelled`/`Failed` file that
/// never passed through `Started`, which may carry `started_at == finished_at`
/// as a mark rather than a true duration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub logical_path: LogicalPath,
    pub physical_path: PhysicalPath,
    pub state: FileState,
    /// Seconds since the epoch; `0` means "not yet".
    pub started_at: i64,
    /// Seconds since the epoch; `0` means "not yet".
    pub finished_at: i64,
}

impl File {
    /// A freshly submitted file, not yet observed.
    #[must_use]
    pub fn submitted(logical_path: LogicalPath, physical_path: PhysicalPath) -> Self {
        Self { logical_path, physical_path, state: FileState::Submitted, started_at: 0, finished_at: 0 }
    }

    /// A file that failed resolution before it was ever observed (e.g. no
    /// storage area matched, or the resolved path is not a regular file).
    #[must_use]
    pub fn failed_at_submission(logical_path: LogicalPath, physical_path: PhysicalPath, now: i64) -> Self {
        Self {
            logical_path,
            physical_path,
            state: FileState::Failed,
            started_at: now,
            finished_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submitted_has_zero_timestamps() {
        let f = File::submitted(LogicalPath::new("/vo/a"), PhysicalPath::new("/data/a"));
        assert_eq!(f.state, FileState::Submitted);
        assert_eq!(f.started_at, 0);
        assert_eq!(f.finished_at, 0);
    }

    #[test]
    fn terminal_states_are_recognised() {
        assert!(FileState::Completed.is_terminal());
        assert!(FileState::Cancelled.is_terminal());
        assert!(FileState::Failed.is_terminal());
        assert!(!FileState::Submitted.is_terminal());
        assert!(!FileState::Started.is_terminal());
    }

    #[test]
    fn cancellable_states() {
        assert!(FileState::Submitted.is_cancellable());
        assert!(FileState::Started.is_cancellable());
        assert!(!FileState::Completed.is_cancellable());
    }
}
