use std::sync::Arc;

use serde::Serialize;
use storm_tape_database::{RequestStore, StoreError};
use storm_tape_domain::{File, FileState, Locality, LogicalPath, Stage};
use storm_tape_kernel::{ApiError, PathResolver};
use storm_tape_storage::Probe;

use crate::lifecycle::LifecycleEngine;
use crate::status::{externalize, ExtendedFileStatus};

fn internal_from_store(err: StoreError) -> ApiError {
    ApiError::internal(err.to_string())
}

fn find_err_to_api(err: StoreError) -> ApiError {
    match err {
        StoreError::NotFound { .. } => ApiError::NotFound,
        other => internal_from_store(other),
    }
}

/// A file's view in a `status` response: the path the client submitted and
/// its current state.
#[derive(Debug, Clone, Serialize)]
pub struct StatusFile {
    pub path: LogicalPath,
    pub state: FileState,
}

/// Full response body for `stage` and `status`.
#[derive(Debug, Clone, Serialize)]
pub struct StageView {
    #[serde(rename = "requestId")]
    pub id: String,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    #[serde(rename = "startedAt")]
    pub started_at: i64,
    #[serde(rename = "completedAt")]
    pub completed_at: i64,
    pub files: Vec<StatusFile>,
}

impl From<Stage> for StageView {
    fn from(stage: Stage) -> Self {
        Self {
            id: stage.id,
            created_at: stage.created_at,
            started_at: stage.started_at,
            completed_at: stage.completed_at,
            files: stage
                .files
                .into_iter()
                .map(|file| StatusFile { path: file.logical_path, state: file.state })
                .collect(),
        }
    }
}

/// One entry of an `archive_info` response: either the file's locality, or
/// an error describing why it could not be statted.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ArchiveInfoEntry {
    Locality { path: LogicalPath, locality: Locality },
    Error { path: LogicalPath, error: String },
}

/// The public request-lifecycle operations: `stage`, `status`, `cancel`,
/// `release`, `delete`, `archive_info`.
pub struct RequestApi {
    store: Arc<dyn RequestStore>,
    resolver: Arc<PathResolver>,
    probe: Arc<dyn Probe>,
    lifecycle: LifecycleEngine,
}

impl std::fmt::Debug for RequestApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestApi").finish_non_exhaustive()
    }
}

impl RequestApi {
    #[must_use]
    pub fn new(
        store: Arc<dyn RequestStore>,
        resolver: Arc<PathResolver>,
        probe: Arc<dyn Probe>,
        concurrency: usize,
    ) -> Self {
        let lifecycle = LifecycleEngine::new(store.clone(), probe.clone(), concurrency);
        Self { store, resolver, probe, lifecycle }
    }

    /// Resolves every requested logical path and inserts a fresh Stage.
    /// A path that fails resolution, or whose resolved path is not a
    /// regular file, is inserted already `failed` rather than rejected.
    pub fn stage(&self, paths: Vec<LogicalPath>, now: i64) -> Result<StageView, ApiError> {
        let files: Vec<File> = paths
            .into_iter()
            .map(|logical| match self.resolver.resolve(&logical) {
                Ok(physical) => match self.probe.file_size_info(physical.as_path()) {
                    Ok(_) => File::submitted(logical, physical),
                    Err(_) => File::failed_at_submission(logical, physical, now),
                },
                Err(_) => {
                    let placeholder = storm_tape_domain::PhysicalPath::new(logical.as_path());
                    File::failed_at_submission(logical, placeholder, now)
                }
            })
            .collect();

        let stage = Stage::new(uuid::Uuid::new_v4().to_string(), now, files);
        self.store.insert(&stage).map_err(internal_from_store)?;
        Ok(stage.into())
    }

    /// Runs one Lifecycle Engine pass over the named stage and returns its
    /// current view.
    pub fn status(&self, id: &str, now: i64) -> Result<StageView, ApiError> {
        let stage = self.store.find(id).map_err(find_err_to_api)?;
        let stage = self.lifecycle.observe(stage, now).map_err(internal_from_store)?;
        Ok(stage.into())
    }

    /// Drives the listed paths' files to `cancelled`. All-or-nothing: if any
    /// requested path is not part of the stage, nothing is persisted and the
    /// full offending list is returned.
    pub fn cancel(&self, id: &str, paths: &[LogicalPath], now: i64) -> Result<StageView, ApiError> {
        self.cancel_or_release(id, paths, now)
    }

    /// Semantic alias of [`Self::cancel`]; whether the recall effort is
    /// actually aborted is the recaller's concern, not this service's.
    pub fn release(&self, id: &str, paths: &[LogicalPath], now: i64) -> Result<StageView, ApiError> {
        self.cancel_or_release(id, paths, now)
    }

    fn cancel_or_release(&self, id: &str, paths: &[LogicalPath], now: i64) -> Result<StageView, ApiError> {
        let stage = self.store.find(id).map_err(find_err_to_api)?;

        let invalid: Vec<LogicalPath> = paths
            .iter()
            .filter(|path| stage.find_file_by_logical_path(path).is_none())
            .cloned()
            .collect();
        if !invalid.is_empty() {
            return Err(ApiError::InvalidPaths { stage_id: id.to_string(), paths: invalid });
        }

        let diffs: Vec<storm_tape_database::FileDiff> = stage
            .files
            .iter()
            .filter(|file| paths.contains(&file.logical_path) && file.state.is_cancellable())
            .map(|file| {
                let started_at = if file.started_at > 0 { file.started_at } else { now };
                storm_tape_database::FileDiff {
                    physical_path: file.physical_path.clone(),
                    state: FileState::Cancelled,
                    started_at: Some(started_at),
                    finished_at: Some(now),
                }
            })
            .collect();

        if !diffs.is_empty() {
            self.store.update_files(id, &diffs).map_err(internal_from_store)?;
        }

        let stage = self.store.find(id).map_err(find_err_to_api)?;
        Ok(stage.into())
    }

    /// Erases a stage and its file rows.
    pub fn delete(&self, id: &str) -> Result<(), ApiError> {
        self.store.erase(id).map_err(find_err_to_api)
    }

    /// Resolves and stats every requested path, independent of any stage.
    pub fn archive_info(&self, paths: Vec<LogicalPath>) -> Vec<ArchiveInfoEntry> {
        paths.into_iter().map(|path| self.archive_info_one(path)).collect()
    }

    fn archive_info_one(&self, path: LogicalPath) -> ArchiveInfoEntry {
        let physical = match self.resolver.resolve(&path) {
            Ok(physical) => physical,
            Err(_) => {
                return ArchiveInfoEntry::Error { path, error: "No such file or directory".into() };
            }
        };

        match std::fs::symlink_metadata(physical.as_path()) {
            Ok(metadata) if metadata.is_dir() => {
                ArchiveInfoEntry::Error { path, error: "Is a directory".into() }
            }
            Ok(metadata) if !metadata.is_file() => {
                ArchiveInfoEntry::Error { path, error: "Not a regular file".into() }
            }
            Ok(_) => {
                let status = ExtendedFileStatus::new(self.probe.as_ref(), physical.as_path());
                let locality = externalize(status.locality(), physical.as_path());
                ArchiveInfoEntry::Locality { path, locality }
            }
            Err(_) => ArchiveInfoEntry::Error { path, error: "No such file or directory".into() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storm_tape_domain::StorageArea;
    use storm_tape_storage::{FakeStorage, FileSizeInfo};

    fn api() -> (tempfile::TempDir, RequestApi) {
        let dir = tempfile::tempdir().unwrap();
        let probe = Arc::new(FakeStorage::new());
        let store = Arc::new(
            storm_tape_database::SqliteRequestStore::open(&dir.path().join("db.sqlite"), 2, probe.clone()).unwrap(),
        );
        let resolver = Arc::new(PathResolver::new(vec![StorageArea::new(
            "vo",
            storm_tape_domain::PhysicalPath::new(dir.path().join("vo")),
            vec![LogicalPath::new("/vo")],
        )]));
        (dir, RequestApi::new(store, resolver, probe, 1))
    }

    #[test]
    fn stage_then_status_round_trips() {
        let (_dir, api) = api();
        let created = api.stage(vec![LogicalPath::new("/vo/a")], 1).unwrap();
        assert_eq!(created.files.len(), 1);
        assert_eq!(created.files[0].state, FileState::Failed); // resolved dir has no file yet

        let fetched = api.status(&created.id, 2).unwrap();
        assert_eq!(fetched.id, created.id);
    }

    #[test]
    fn stage_with_unresolvable_path_fails_immediately() {
        let (_dir, api) = api();
        let created = api.stage(vec![LogicalPath::new("/elsewhere/a")], 1).unwrap();
        assert_eq!(created.files[0].state, FileState::Failed);
    }

    #[test]
    fn cancel_with_unknown_path_is_all_or_nothing() {
        let (_dir, api) = api();
        let created = api.stage(vec![LogicalPath::new("/vo/a")], 1).unwrap();
        let err = api
            .cancel(&created.id, &[LogicalPath::new("/vo/a"), LogicalPath::new("/vo/missing")], 3)
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidPaths { .. }));

        // Nothing was modified: the file is still failed, not cancelled.
        let status = api.status(&created.id, 2).unwrap();
        assert_eq!(status.files[0].state, FileState::Failed);
    }

    #[test]
    fn delete_then_status_is_not_found() {
        let (_dir, api) = api();
        let created = api.stage(vec![LogicalPath::new("/vo/a")], 1).unwrap();
        api.delete(&created.id).unwrap();
        assert!(matches!(api.status(&created.id, 2), Err(ApiError::NotFound)));
    }

    #[test]
    fn archive_info_reports_missing_and_present_files() {
        let dir = tempfile::tempdir().unwrap();
        let probe = Arc::new(FakeStorage::new());
        std::fs::create_dir_all(dir.path().join("vo")).unwrap();
        std::fs::write(dir.path().join("vo").join("present"), b"x").unwrap();
        probe.seed(dir.path().join("vo").join("present"), false, FileSizeInfo { size: 1, is_stub: false });
        let store = Arc::new(
            storm_tape_database::SqliteRequestStore::open(&dir.path().join("db.sqlite"), 2, probe.clone()).unwrap(),
        );
        let resolver = Arc::new(PathResolver::new(vec![StorageArea::new(
            "vo",
            storm_tape_domain::PhysicalPath::new(dir.path().join("vo")),
            vec![LogicalPath::new("/vo")],
        )]));
        let api = RequestApi::new(store, resolver, probe, 1);

        let entries = api.archive_info(vec![LogicalPath::new("/vo/present"), LogicalPath::new("/vo/absent")]);
        assert!(matches!(entries[0], ArchiveInfoEntry::Locality { locality: Locality::Disk, .. }));
        assert!(matches!(entries[1], ArchiveInfoEntry::Error { .. }));
    }
}
