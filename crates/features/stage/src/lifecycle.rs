use std::sync::Arc;

use storm_tape_database::{FileDiff, RequestStore, StoreError};
use storm_tape_domain::{File, FileState, Stage};
use storm_tape_storage::Probe;

use crate::status::ExtendedFileStatus;

/// Brings a Stage's file rows into agreement with what the filesystem shows
/// right now, persisting the diff, and returns the updated Stage.
///
/// Invoked before every response that mirrors Stage state: `status`,
/// `in_progress`, `take_over`, `cancel`/`release`.
pub struct LifecycleEngine {
    store: Arc<dyn RequestStore>,
    probe: Arc<dyn Probe>,
    concurrency: usize,
}

impl std::fmt::Debug for LifecycleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleEngine").field("concurrency", &self.concurrency).finish_non_exhaustive()
    }
}

impl LifecycleEngine {
    #[must_use]
    pub fn new(store: Arc<dyn RequestStore>, probe: Arc<dyn Probe>, concurrency: usize) -> Self {
        Self { store, probe, concurrency: concurrency.max(1) }
    }

    /// One file's transition decision, per the table in §4.4. A `size_info`
    /// probe error (the file is missing, or otherwise unstatable) is the
    /// "fs error" row of the table and fails the file; a valid stub — the
    /// file exists, is on tape, and is simply not in progress yet — is left
    /// unchanged rather than folded into the error case, or every
    /// freshly-submitted tape-only file would fail on its first poll.
    fn decide(probe: &dyn Probe, file: &File, now: i64) -> Option<(FileState, i64, i64)> {
        if file.state.is_terminal() {
            return None;
        }

        let status = ExtendedFileStatus::new(probe, file.physical_path.as_path());
        let in_progress = status.is_in_progress().unwrap_or(false);
        let size_info = status.size_info();

        match file.state {
            FileState::Submitted if in_progress => Some((FileState::Started, now, 0)),
            FileState::Submitted => match size_info {
                Ok(info) if !info.is_stub => Some((FileState::Completed, now, now)),
                Ok(_) => None,
                Err(()) => Some((FileState::Failed, now, now)),
            },
            FileState::Started if in_progress => None,
            FileState::Started => match size_info {
                Ok(info) if !info.is_stub => Some((FileState::Completed, file.started_at, now)),
                Ok(_) => None,
                Err(()) => Some((FileState::Failed, file.started_at, now)),
            },
            FileState::Completed | FileState::Cancelled | FileState::Failed => unreachable!("terminal states return above"),
        }
    }

    /// Probes every non-terminal file of `stage`, sequentially when
    /// `concurrency <= 1` (the default) or fanned out across
    /// `std::thread::scope` otherwise. Both paths call the same pure
    /// [`Self::decide`] per file, so they produce identical results.
    fn decide_all(&self, stage: &Stage, now: i64) -> Vec<Option<(FileState, i64, i64)>> {
        if self.concurrency <= 1 || stage.files.len() <= 1 {
            return stage.files.iter().map(|file| Self::decide(self.probe.as_ref(), file, now)).collect();
        }

        let probe = self.probe.as_ref();
        let files = &stage.files;
        let chunk_size = files.len().div_ceil(self.concurrency).max(1);

        std::thread::scope(|scope| {
            let handles: Vec<_> = files
                .chunks(chunk_size)
                .enumerate()
                .map(|(chunk_index, chunk)| {
                    let start = chunk_index * chunk_size;
                    let handle = scope.spawn(move || {
                        chunk.iter().map(|file| Self::decide(probe, file, now)).collect::<Vec<_>>()
                    });
                    (start, handle)
                })
                .collect();

            let mut decisions = vec![None; files.len()];
            for (start, handle) in handles {
                let chunk_decisions = handle.join().expect("lifecycle probe thread panicked");
                for (offset, decision) in chunk_decisions.into_iter().enumerate() {
                    decisions[start + offset] = decision;
                }
            }
            decisions
        })
    }

    /// Runs one observation pass over `stage` and returns the stage with its
    /// in-memory rows brought up to date, after the diff (if any) has been
    /// durably applied.
    pub fn observe(&self, mut stage: Stage, now: i64) -> Result<Stage, StoreError> {
        let decisions = self.decide_all(&stage, now);

        let mut diffs = Vec::new();
        for (file, decision) in stage.files.iter_mut().zip(decisions) {
            let Some((state, started_at, finished_at)) = decision else {
                continue;
            };
            file.state = state;
            file.started_at = started_at;
            file.finished_at = finished_at;
            diffs.push(FileDiff {
                physical_path: file.physical_path.clone(),
                state,
                started_at: Some(started_at),
                finished_at: Some(finished_at),
            });
        }

        if !diffs.is_empty() {
            self.store.update_files(&stage.id, &diffs)?;
        }

        let previous = (stage.started_at, stage.completed_at);
        stage.recompute_times();
        if (stage.started_at, stage.completed_at) != previous {
            self.store.update_stage_times(&stage.id, stage.started_at, stage.completed_at)?;
        }

        Ok(stage)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use storm_tape_database::SqliteRequestStore;
    use storm_tape_domain::{LogicalPath, PhysicalPath};
    use storm_tape_storage::{FakeStorage, FileSizeInfo};

    fn engine(probe: Arc<FakeStorage>, concurrency: usize) -> (tempfile::TempDir, LifecycleEngine) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteRequestStore::open(&dir.path().join("db.sqlite"), 2, probe.clone()).unwrap());
        (dir, LifecycleEngine::new(store, probe, concurrency))
    }

    fn submitted(path: &str) -> File {
        File::submitted(LogicalPath::new(format!("/vo{path}")), PhysicalPath::new(format!("/data{path}")))
    }

    #[test]
    fn submitted_with_in_progress_sentinel_starts() {
        let probe = Arc::new(FakeStorage::new());
        probe.seed("/data/a", false, FileSizeInfo::default());
        probe.mark_in_progress(Path::new("/data/a")).unwrap();
        let (_dir, engine) = engine(probe, 1);

        let stage = Stage::new("s1".into(), 1, vec![submitted("/a")]);
        let observed = engine.observe(stage, 100).unwrap();
        assert_eq!(observed.files[0].state, FileState::Started);
        assert_eq!(observed.files[0].started_at, 100);
    }

    #[test]
    fn submitted_already_landed_completes() {
        let probe = Arc::new(FakeStorage::new());
        probe.seed("/data/a", false, FileSizeInfo { size: 10, is_stub: false });
        let (_dir, engine) = engine(probe, 1);

        let stage = Stage::new("s1".into(), 1, vec![submitted("/a")]);
        let observed = engine.observe(stage, 100).unwrap();
        assert_eq!(observed.files[0].state, FileState::Completed);
        assert_eq!(observed.completed_at, 100);
    }

    #[test]
    fn submitted_missing_file_fails() {
        let probe = Arc::new(FakeStorage::new());
        probe.seed_missing("/data/a");
        let (_dir, engine) = engine(probe, 1);

        let stage = Stage::new("s1".into(), 1, vec![submitted("/a")]);
        let observed = engine.observe(stage, 100).unwrap();
        assert_eq!(observed.files[0].state, FileState::Failed);
    }

    #[test]
    fn submitted_valid_stub_not_in_progress_stays_submitted() {
        let probe = Arc::new(FakeStorage::new());
        probe.seed("/data/a", true, FileSizeInfo { size: 10, is_stub: true });
        let (_dir, engine) = engine(probe, 1);

        let stage = Stage::new("s1".into(), 1, vec![submitted("/a")]);
        let observed = engine.observe(stage, 100).unwrap();
        assert_eq!(observed.files[0].state, FileState::Submitted);
        assert_eq!(observed.files[0].started_at, 0);
        assert_eq!(observed.files[0].finished_at, 0);
    }

    #[test]
    fn started_valid_stub_not_in_progress_stays_started() {
        let probe = Arc::new(FakeStorage::new());
        probe.seed("/data/a", true, FileSizeInfo { size: 10, is_stub: true });
        let (_dir, engine) = engine(probe, 1);

        let mut file = submitted("/a");
        file.state = FileState::Started;
        file.started_at = 5;
        let stage = Stage::new("s1".into(), 1, vec![file]);
        let observed = engine.observe(stage, 100).unwrap();
        assert_eq!(observed.files[0].state, FileState::Started);
        assert_eq!(observed.files[0].started_at, 5);
        assert_eq!(observed.files[0].finished_at, 0);
    }

    #[test]
    fn terminal_files_are_left_alone() {
        let probe = Arc::new(FakeStorage::new());
        let (_dir, engine) = engine(probe, 1);

        let mut file = submitted("/a");
        file.state = FileState::Cancelled;
        file.started_at = 5;
        file.finished_at = 5;
        let stage = Stage::new("s1".into(), 1, vec![file]);
        let observed = engine.observe(stage, 100).unwrap();
        assert_eq!(observed.files[0].state, FileState::Cancelled);
        assert_eq!(observed.files[0].finished_at, 5);
    }

    #[test]
    fn parallel_and_sequential_passes_agree() {
        let probe = Arc::new(FakeStorage::new());
        for i in 0..8 {
            probe.seed(format!("/data/{i}"), false, FileSizeInfo { size: 10, is_stub: i % 2 == 0 });
        }
        let files: Vec<File> = (0..8).map(|i| submitted(&format!("/{i}"))).collect();

        let (_dir1, seq) = engine(probe.clone(), 1);
        let (_dir2, par) = engine(probe, 4);

        let seq_result = seq.observe(Stage::new("s1".into(), 1, files.clone()), 100).unwrap();
        let par_result = par.observe(Stage::new("s2".into(), 1, files), 100).unwrap();

        let seq_states: Vec<_> = seq_result.files.iter().map(|f| f.state).collect();
        let par_states: Vec<_> = par_result.files.iter().map(|f| f.state).collect();
        assert_eq!(seq_states, par_states);
    }
}
