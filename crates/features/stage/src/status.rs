use std::cell::OnceCell;
use std::path::Path;

use storm_tape_domain::Locality;
use storm_tape_storage::{FileSizeInfo, Probe};
use tracing::{error, warn};

/// Memoises the three probe facts for one physical path over the lifetime of
/// a single observation pass and derives a [`Locality`] from them.
///
/// Built fresh for every file on every pass; never reused across passes, so a
/// cached `false` from ten seconds ago can never leak into the next poll.
pub struct ExtendedFileStatus<'a> {
    probe: &'a dyn Probe,
    path: &'a Path,
    in_progress: OnceCell<Result<bool, ()>>,
    size_info: OnceCell<Result<FileSizeInfo, ()>>,
    on_tape: OnceCell<Result<bool, ()>>,
}

impl std::fmt::Debug for ExtendedFileStatus<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtendedFileStatus").field("path", &self.path).finish_non_exhaustive()
    }
}

impl<'a> ExtendedFileStatus<'a> {
    pub fn new(probe: &'a dyn Probe, path: &'a Path) -> Self {
        Self {
            probe,
            path,
            in_progress: OnceCell::new(),
            size_info: OnceCell::new(),
            on_tape: OnceCell::new(),
        }
    }

    /// Whether the recall agent's in-progress sentinel is present.
    pub fn is_in_progress(&self) -> Result<bool, ()> {
        *self.in_progress.get_or_init(|| {
            self.probe.is_in_progress(self.path).map_err(|error| {
                warn!(path = %self.path.display(), %error, "probe: is_in_progress failed");
            })
        })
    }

    /// Size and stub-ness of the physical file.
    pub fn size_info(&self) -> Result<FileSizeInfo, ()> {
        *self.size_info.get_or_init(|| {
            self.probe.file_size_info(self.path).map_err(|error| {
                warn!(path = %self.path.display(), %error, "probe: file_size_info failed");
            })
        })
    }

    /// Whether the tape-migration marker is present.
    pub fn is_on_tape(&self) -> Result<bool, ()> {
        *self.on_tape.get_or_init(|| {
            self.probe.is_on_tape(self.path).map_err(|error| {
                warn!(path = %self.path.display(), %error, "probe: is_on_tape failed");
            })
        })
    }

    /// Derives a [`Locality`] from the three probe facts (§4.2's truth
    /// table): `on_disk = ¬is_stub ∧ ¬is_in_progress`. Any underlying probe
    /// error collapses the whole thing to `Unavailable` rather than
    /// reporting a partial, possibly misleading, locality.
    #[must_use]
    pub fn locality(&self) -> Locality {
        let on_disk = match (self.size_info(), self.is_in_progress()) {
            (Ok(size_info), Ok(in_progress)) => !size_info.is_stub && !in_progress,
            _ => return Locality::Unavailable,
        };
        match self.is_on_tape() {
            Ok(on_tape) => Locality::from_probe_facts(on_disk, on_tape),
            Err(()) => Locality::Unavailable,
        }
    }
}

/// Rewrites `Lost` to `Unavailable` before it leaves the core, logging at
/// `error` since `Lost` is an operator-visible data-loss signal (on tape
/// marker absent or unreadable, no live disk copy either) that must not
/// alarm the client as-is.
#[must_use]
pub fn externalize(locality: Locality, path: &Path) -> Locality {
    if locality == Locality::Lost {
        error!(path = %path.display(), "file is lost: no live disk copy and no tape marker");
    }
    locality.externalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use storm_tape_storage::FakeStorage;

    #[test]
    fn derives_disk_and_tape_locality() {
        let storage = FakeStorage::new();
        storage.seed("/data/a", true, FileSizeInfo { size: 10, is_stub: false });
        let status = ExtendedFileStatus::new(&storage, Path::new("/data/a"));
        assert_eq!(status.locality(), Locality::DiskAndTape);
    }

    #[test]
    fn stub_with_no_tape_marker_is_lost() {
        let storage = FakeStorage::new();
        storage.seed("/data/a", false, FileSizeInfo { size: 10, is_stub: true });
        let status = ExtendedFileStatus::new(&storage, Path::new("/data/a"));
        assert_eq!(status.locality(), Locality::Lost);
    }

    #[test]
    fn probe_error_collapses_to_unavailable() {
        let storage = FakeStorage::new();
        storage.seed_missing("/data/gone");
        let status = ExtendedFileStatus::new(&storage, Path::new("/data/gone"));
        assert_eq!(status.locality(), Locality::Unavailable);
    }

    #[test]
    fn in_progress_file_is_not_on_disk() {
        let storage = FakeStorage::new();
        storage.seed("/data/a", true, FileSizeInfo { size: 10, is_stub: false });
        storage.mark_in_progress(Path::new("/data/a")).unwrap();
        let status = ExtendedFileStatus::new(&storage, Path::new("/data/a"));
        assert_eq!(status.locality(), Locality::Tape);
    }

    #[test]
    fn results_are_memoised_within_one_pass() {
        let storage = FakeStorage::new();
        storage.seed("/data/a", true, FileSizeInfo { size: 10, is_stub: false });
        let status = ExtendedFileStatus::new(&storage, Path::new("/data/a"));
        assert_eq!(status.is_on_tape(), status.is_on_tape());
        storage.seed("/data/a", false, FileSizeInfo { size: 10, is_stub: false });
        // Still memoised: the second seed is invisible within this pass.
        assert_eq!(status.is_on_tape(), Ok(true));
    }

    #[test]
    fn externalize_rewrites_lost_to_unavailable() {
        assert_eq!(externalize(Locality::Lost, Path::new("/data/a")), Locality::Unavailable);
        assert_eq!(externalize(Locality::Disk, Path::new("/data/a")), Locality::Disk);
    }
}
