use serde::{Deserialize, Serialize};

use crate::path::{LogicalPath, PhysicalPath};

/// A named mapping between a set of logical-path prefixes and a local
/// filesystem root.
///
/// The structural shape lives here; the cross-storage-area invariants
/// (unique names, non-overlapping access points, absoluteness) are
/// configuration-loader concerns and are enforced by `storm-tape-kernel`,
/// since they require comparing a whole table of areas against each other
/// rather than anything a single `StorageArea` value can check alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageArea {
    pub name: String,
    pub root: PhysicalPath,
    pub access_points: Vec<LogicalPath>,
}

impl StorageArea {
    #[must_use]
    pub fn new(name: impl Into<String>, root: PhysicalPath, access_points: Vec<LogicalPath>) -> Self {
        Self { name: name.into(), root, access_points }
    }

    /// The longest access point that is a prefix of `path`, if any.
    #[must_use]
    pub fn longest_matching_access_point(&self, path: &LogicalPath) -> Option<&LogicalPath> {
        self.access_points
            .iter()
            .filter(|ap| path.starts_with(ap))
            .max_by_key(|ap| ap.as_path().as_os_str().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_longest_prefix() {
        let area = StorageArea::new(
            "vo",
            PhysicalPath::new("/data/vo"),
            vec![LogicalPath::new("/vo"), LogicalPath::new("/vo/nested")],
        );
        let path = LogicalPath::new("/vo/nested/file.dat");
        let matched = area.longest_matching_access_point(&path).unwrap();
        assert_eq!(matched, &LogicalPath::new("/vo/nested"));
    }

    #[test]
    fn no_match_outside_access_points() {
        let area = StorageArea::new("vo", PhysicalPath::new("/data/vo"), vec![LogicalPath::new("/vo")]);
        assert!(area.longest_matching_access_point(&LogicalPath::new("/other/file")).is_none());
    }
}
