use std::path::Path;
use std::sync::Arc;

use rusqlite::{OptionalExtension, Transaction, params};
use storm_tape_domain::{File, FileState, LogicalPath, PhysicalPath, Stage};
use storm_tape_storage::Probe;
use tracing::warn;

use crate::error::StoreError;
use crate::pool::ReadPool;
use crate::writer::Writer;

/// A single pending change to one file row, as computed by the Lifecycle
/// Engine for one observation pass.
#[derive(Debug, Clone)]
pub struct FileDiff {
    pub physical_path: PhysicalPath,
    pub state: FileState,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
}

/// Durable store of stage requests and their file rows.
///
/// Every mutating method round-trips through the single writer thread and
/// only returns once the change is committed; every read-only method takes
/// a connection from the pooled readers. See `storm-tape-database`'s crate
/// docs for the concurrency rationale.
pub trait RequestStore: Send + Sync {
    /// Persists a fresh stage with all its file rows.
    fn insert(&self, stage: &Stage) -> Result<(), StoreError>;

    /// Returns the stage for `id`, or `StoreError::NotFound`.
    fn find(&self, id: &str) -> Result<Stage, StoreError>;

    /// Applies a diff list to the named stage's file rows, atomically.
    fn update_files(&self, id: &str, diffs: &[FileDiff]) -> Result<(), StoreError>;

    /// Updates the stage-level `started_at`/`completed_at` timestamps.
    fn update_stage_times(&self, id: &str, started_at: i64, completed_at: i64) -> Result<(), StoreError>;

    /// Deletes a stage and its file rows. `StoreError::NotFound` if it never existed.
    fn erase(&self, id: &str) -> Result<(), StoreError>;

    /// Number of file rows, across all non-terminated stages, eligible for take-over.
    fn count_recallable(&self) -> Result<u64, StoreError>;

    /// Selects and reserves up to `n` eligible physical paths for take-over,
    /// oldest stage first, marking each with the in-progress sentinel as it
    /// is selected. Exclusive: no two concurrent calls return overlapping paths.
    fn take_recallable(&self, n: usize) -> Result<Vec<PhysicalPath>, StoreError>;

    /// Physical paths currently believed to be in progress, up to `limit`.
    /// When `precise`, each is re-checked against the filesystem and dropped
    /// if the sentinel has already been cleared.
    fn in_progress(&self, limit: usize, precise: bool) -> Result<Vec<PhysicalPath>, StoreError>;
}

/// The sole production [`RequestStore`]: SQLite accessed through one
/// dedicated writer thread and a small pool of read-only connections.
pub struct SqliteRequestStore {
    read_pool: ReadPool,
    writer: Writer,
    probe: Arc<dyn Probe>,
}

impl std::fmt::Debug for SqliteRequestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRequestStore").finish_non_exhaustive()
    }
}

impl SqliteRequestStore {
    /// Opens (creating if absent) the database at `path`, bootstraps the
    /// schema, and starts the writer thread.
    pub fn open(path: &Path, read_pool_size: usize, probe: Arc<dyn Probe>) -> Result<Self, StoreError> {
        let read_pool = ReadPool::open(path, read_pool_size)?;
        let writer = Writer::spawn(path.to_path_buf())?;
        Ok(Self { read_pool, writer, probe })
    }
}

fn state_to_str(state: FileState) -> &'static str {
    match state {
        FileState::Submitted => "submitted",
        FileState::Started => "started",
        FileState::Completed => "completed",
        FileState::Cancelled => "cancelled",
        FileState::Failed => "failed",
    }
}

fn state_from_str(s: &str) -> Result<FileState, StoreError> {
    match s {
        "submitted" => Ok(FileState::Submitted),
        "started" => Ok(FileState::Started),
        "completed" => Ok(FileState::Completed),
        "cancelled" => Ok(FileState::Cancelled),
        "failed" => Ok(FileState::Failed),
        other => Err(StoreError::Internal { message: format!("unknown file state '{other}' in database").into(), context: None }),
    }
}

fn load_stage(conn: &rusqlite::Connection, id: &str) -> Result<Stage, StoreError> {
    let stage_row = conn
        .query_row(
            "SELECT created_at, started_at, completed_at FROM stages WHERE id = ?1",
            params![id],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?)),
        )
        .optional()
        .map_err(|source| StoreError::Sqlite { source, context: Some("loading stage row".into()) })?;

    let Some((created_at, started_at, completed_at)) = stage_row else {
        return Err(StoreError::NotFound { id: id.to_string() });
    };

    let mut stmt = conn
        .prepare(
            "SELECT logical_path, physical_path, state, started_at, finished_at \
             FROM files WHERE stage_id = ?1 ORDER BY rowid",
        )
        .map_err(|source| StoreError::Sqlite { source, context: Some("preparing files query".into()) })?;

    let files = stmt
        .query_map(params![id], |row| {
            let logical: String = row.get(0)?;
            let physical: String = row.get(1)?;
            let state: String = row.get(2)?;
            let started_at: i64 = row.get(3)?;
            let finished_at: i64 = row.get(4)?;
            Ok((logical, physical, state, started_at, finished_at))
        })
        .map_err(|source| StoreError::Sqlite { source, context: Some("querying files".into()) })?
        .map(|row| {
            let (logical, physical, state, started_at, finished_at) = row
                .map_err(|source| StoreError::Sqlite { source, context: Some("reading file row".into()) })?;
            Ok(File {
                logical_path: LogicalPath::new(logical),
                physical_path: PhysicalPath::new(physical),
                state: state_from_str(&state)?,
                started_at,
                finished_at,
            })
        })
        .collect::<Result<Vec<_>, StoreError>>()?;

    Ok(Stage { id: id.to_string(), created_at, started_at, completed_at, files })
}

impl RequestStore for SqliteRequestStore {
    fn insert(&self, stage: &Stage) -> Result<(), StoreError> {
        let stage = stage.clone();
        self.writer.submit(move |tx: &Transaction<'_>| {
            tx.execute(
                "INSERT INTO stages (id, created_at, started_at, completed_at) VALUES (?1, ?2, ?3, ?4)",
                params![stage.id, stage.created_at, stage.started_at, stage.completed_at],
            )
            .map_err(|source| StoreError::Sqlite { source, context: Some("inserting stage".into()) })?;

            for file in &stage.files {
                tx.execute(
                    "INSERT INTO files (stage_id, logical_path, physical_path, state, started_at, finished_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        stage.id,
                        file.logical_path.to_string(),
                        file.physical_path.to_string(),
                        state_to_str(file.state),
                        file.started_at,
                        file.finished_at,
                    ],
                )
                .map_err(|source| StoreError::Sqlite { source, context: Some("inserting file row".into()) })?;
            }
            Ok(())
        })
    }

    fn find(&self, id: &str) -> Result<Stage, StoreError> {
        let id = id.to_string();
        self.read_pool.with(|conn| load_stage(conn, &id))
    }

    fn update_files(&self, id: &str, diffs: &[FileDiff]) -> Result<(), StoreError> {
        if diffs.is_empty() {
            return Ok(());
        }
        let id = id.to_string();
        let diffs = diffs.to_vec();
        self.writer.submit(move |tx: &Transaction<'_>| {
            for diff in &diffs {
                tx.execute(
                    "UPDATE files SET state = ?1, started_at = ?2, finished_at = ?3 \
                     WHERE stage_id = ?4 AND physical_path = ?5",
                    params![
                        state_to_str(diff.state),
                        diff.started_at.unwrap_or(0),
                        diff.finished_at.unwrap_or(0),
                        id,
                        diff.physical_path.to_string(),
                    ],
                )
                .map_err(|source| StoreError::Sqlite { source, context: Some("updating file row".into()) })?;
            }
            Ok(())
        })
    }

    fn update_stage_times(&self, id: &str, started_at: i64, completed_at: i64) -> Result<(), StoreError> {
        let id = id.to_string();
        self.writer.submit(move |tx: &Transaction<'_>| {
            tx.execute(
                "UPDATE stages SET started_at = ?1, completed_at = ?2 WHERE id = ?3",
                params![started_at, completed_at, id],
            )
            .map_err(|source| StoreError::Sqlite { source, context: Some("updating stage times".into()) })?;
            Ok(())
        })
    }

    fn erase(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        self.writer.submit(move |tx: &Transaction<'_>| {
            let affected = tx
                .execute("DELETE FROM stages WHERE id = ?1", params![id])
                .map_err(|source| StoreError::Sqlite { source, context: Some("deleting stage".into()) })?;
            if affected == 0 {
                return Err(StoreError::NotFound { id: id.clone() });
            }
            tx.execute("DELETE FROM files WHERE stage_id = ?1", params![id])
                .map_err(|source| StoreError::Sqlite { source, context: Some("deleting file rows".into()) })?;
            Ok(())
        })
    }

    fn count_recallable(&self) -> Result<u64, StoreError> {
        let probe = Arc::clone(&self.probe);
        self.read_pool.with(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT f.physical_path FROM files f JOIN stages s ON s.id = f.stage_id \
                     WHERE f.state IN ('submitted', 'started') AND s.completed_at = 0",
                )
                .map_err(|source| StoreError::Sqlite { source, context: Some("preparing recallable count query".into()) })?;

            let candidates: Vec<String> = stmt
                .query_map([], |row| row.get(0))
                .map_err(|source| StoreError::Sqlite { source, context: Some("querying recallable count candidates".into()) })?
                .collect::<Result<_, _>>()
                .map_err(|source| StoreError::Sqlite { source, context: Some("reading recallable count candidate".into()) })?;

            // §4.3: "whose physical path is not yet in-progress on disk" — a
            // stored `started` row usually mirrors an in-progress sentinel
            // already set, but the live filesystem fact is authoritative, not
            // the cached state column.
            let count = candidates
                .into_iter()
                .filter(|path| !matches!(probe.is_in_progress(PhysicalPath::new(path).as_path()), Ok(true)))
                .count();
            Ok(count as u64)
        })
    }

    fn take_recallable(&self, n: usize) -> Result<Vec<PhysicalPath>, StoreError> {
        let probe = Arc::clone(&self.probe);
        self.writer.submit(move |tx: &Transaction<'_>| {
            let mut stmt = tx
                .prepare(
                    "SELECT f.physical_path FROM files f JOIN stages s ON s.id = f.stage_id \
                     WHERE f.state IN ('submitted', 'started') AND s.completed_at = 0 \
                     ORDER BY s.created_at ASC, f.rowid ASC",
                )
                .map_err(|source| StoreError::Sqlite { source, context: Some("preparing recallable query".into()) })?;

            let candidates: Vec<String> = stmt
                .query_map([], |row| row.get(0))
                .map_err(|source| StoreError::Sqlite { source, context: Some("querying recallable candidates".into()) })?
                .collect::<Result<_, _>>()
                .map_err(|source| StoreError::Sqlite { source, context: Some("reading recallable candidate".into()) })?;

            let mut marked = Vec::new();
            for candidate in candidates {
                if marked.len() >= n {
                    break;
                }
                let path = PhysicalPath::new(&candidate);

                // Eligible localities are Tape and Lost, i.e. anything that is
                // not a live disk copy: a stub, a missing file, or a probe
                // error all count as "not on disk" here, mirroring the
                // asymmetry against `Locality::externalize` (Lost must stay
                // take-over eligible even though it externalizes to
                // Unavailable and is otherwise invisible to clients).
                let on_disk = matches!(probe.file_size_info(path.as_path()), Ok(info) if !info.is_stub);
                if on_disk {
                    continue;
                }
                match probe.is_in_progress(path.as_path()) {
                    Ok(true) => continue,
                    Ok(false) => {}
                    Err(_) => continue,
                }

                match probe.mark_in_progress(path.as_path()) {
                    Ok(()) => marked.push(path),
                    Err(error) => {
                        warn!(path = %candidate, %error, "take_over: failed to mark in-progress sentinel, skipping");
                    }
                }
            }
            Ok(marked)
        })
    }

    fn in_progress(&self, limit: usize, precise: bool) -> Result<Vec<PhysicalPath>, StoreError> {
        let probe = Arc::clone(&self.probe);
        self.read_pool.with(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT physical_path FROM files WHERE state = 'started' ORDER BY rowid LIMIT ?1",
                )
                .map_err(|source| StoreError::Sqlite { source, context: Some("preparing in_progress query".into()) })?;

            let paths: Vec<String> = stmt
                .query_map(params![limit as i64], |row| row.get(0))
                .map_err(|source| StoreError::Sqlite { source, context: Some("querying in_progress files".into()) })?
                .collect::<Result<_, _>>()
                .map_err(|source| StoreError::Sqlite { source, context: Some("reading in_progress row".into()) })?;

            let mut result = Vec::with_capacity(paths.len());
            for raw in paths {
                let path = PhysicalPath::new(&raw);
                if precise {
                    match probe.is_in_progress(path.as_path()) {
                        Ok(true) => result.push(path),
                        Ok(false) => {}
                        Err(error) => warn!(path = %raw, %error, "in_progress: probe re-check failed, dropping"),
                    }
                } else {
                    result.push(path);
                }
            }
            Ok(result)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storm_tape_storage::{FakeStorage, FileSizeInfo};

    fn new_store() -> (tempfile::TempDir, SqliteRequestStore) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("storm-tape.sqlite");
        let store = SqliteRequestStore::open(&db_path, 2, Arc::new(FakeStorage::new())).unwrap();
        (dir, store)
    }

    fn file(path: &str, state: FileState, started_at: i64, finished_at: i64) -> File {
        File {
            logical_path: LogicalPath::new(format!("/vo{path}")),
            physical_path: PhysicalPath::new(format!("/data{path}")),
            state,
            started_at,
            finished_at,
        }
    }

    #[test]
    fn insert_then_find_round_trips() {
        let (_dir, store) = new_store();
        let stage = Stage::new("s1".into(), 10, vec![file("/a", FileState::Submitted, 0, 0)]);
        store.insert(&stage).unwrap();

        let loaded = store.find("s1").unwrap();
        assert_eq!(loaded.id, "s1");
        assert_eq!(loaded.files.len(), 1);
        assert_eq!(loaded.files[0].state, FileState::Submitted);
    }

    #[test]
    fn find_missing_is_not_found() {
        let (_dir, store) = new_store();
        assert!(matches!(store.find("nope"), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn update_files_applies_diff() {
        let (_dir, store) = new_store();
        let stage = Stage::new("s1".into(), 10, vec![file("/a", FileState::Submitted, 0, 0)]);
        store.insert(&stage).unwrap();

        store
            .update_files(
                "s1",
                &[FileDiff {
                    physical_path: PhysicalPath::new("/data/a"),
                    state: FileState::Started,
                    started_at: Some(42),
                    finished_at: None,
                }],
            )
            .unwrap();

        let loaded = store.find("s1").unwrap();
        assert_eq!(loaded.files[0].state, FileState::Started);
        assert_eq!(loaded.files[0].started_at, 42);
    }

    #[test]
    fn erase_removes_stage_and_is_not_found_after() {
        let (_dir, store) = new_store();
        let stage = Stage::new("s1".into(), 10, vec![file("/a", FileState::Submitted, 0, 0)]);
        store.insert(&stage).unwrap();

        store.erase("s1").unwrap();
        assert!(matches!(store.find("s1"), Err(StoreError::NotFound { .. })));
        assert!(matches!(store.erase("s1"), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn count_recallable_counts_non_terminal_files() {
        let (_dir, store) = new_store();
        let stage = Stage::new(
            "s1".into(),
            10,
            vec![file("/a", FileState::Submitted, 0, 0), file("/b", FileState::Completed, 1, 2)],
        );
        store.insert(&stage).unwrap();

        assert_eq!(store.count_recallable().unwrap(), 1);
    }

    #[test]
    fn count_recallable_excludes_files_already_in_progress() {
        let probe = Arc::new(FakeStorage::new());
        probe.seed("/data/a", true, FileSizeInfo { size: 100, is_stub: true });
        probe.seed("/data/b", true, FileSizeInfo { size: 100, is_stub: true });
        probe.mark_in_progress(Path::new("/data/a")).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteRequestStore::open(&dir.path().join("db.sqlite"), 2, probe).unwrap();

        let stage = Stage::new(
            "s1".into(),
            10,
            vec![file("/a", FileState::Started, 5, 0), file("/b", FileState::Submitted, 0, 0)],
        );
        store.insert(&stage).unwrap();

        // `/data/a` is already marked in-progress on disk, so only `/data/b` counts.
        assert_eq!(store.count_recallable().unwrap(), 1);
    }

    #[test]
    fn take_recallable_marks_eligible_files() {
        let probe = Arc::new(FakeStorage::new());
        probe.seed("/data/a", true, FileSizeInfo { size: 100, is_stub: true });
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteRequestStore::open(&dir.path().join("db.sqlite"), 2, probe.clone()).unwrap();

        let stage = Stage::new("s1".into(), 10, vec![file("/a", FileState::Submitted, 0, 0)]);
        store.insert(&stage).unwrap();

        let marked = store.take_recallable(10).unwrap();
        assert_eq!(marked, vec![PhysicalPath::new("/data/a")]);
        assert!(probe.is_in_progress(PhysicalPath::new("/data/a").as_path()).unwrap());

        // A second call finds nothing left to take.
        assert!(store.take_recallable(10).unwrap().is_empty());
    }
}
