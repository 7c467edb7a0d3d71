//! Normalised path newtypes.
//!
//! `LogicalPath` and `PhysicalPath` wrap an owned, lexically-normalised path
//! buffer. They are distinct at the type level on purpose: the only place
//! they are allowed to meet is the path resolver, which holds both ends of
//! the mapping. Everywhere else, accepting the wrong one is a type error
//! rather than a runtime bug.

use std::cmp::Ordering;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Lexically normalises a path: resolves `.`/`..` components without
/// touching the filesystem and collapses repeated separators.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !matches!(out.components().next_back(), None | Some(Component::RootDir)) {
                    out.pop();
                } else {
                    out.push(component.as_os_str());
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

macro_rules! path_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(PathBuf);

        impl $name {
            /// Builds a new instance from any path-like value, normalising it lexically.
            pub fn new(path: impl AsRef<Path>) -> Self {
                Self(normalize(path.as_ref()))
            }

            #[must_use]
            pub fn as_path(&self) -> &Path {
                &self.0
            }

            #[must_use]
            pub fn into_path_buf(self) -> PathBuf {
                self.0
            }

            /// True if `self` is prefixed by `other`.
            #[must_use]
            pub fn starts_with(&self, other: &Self) -> bool {
                self.0.starts_with(&other.0)
            }

            /// Strips a matching prefix, returning the remainder (relative) path.
            #[must_use]
            pub fn strip_prefix(&self, prefix: &Self) -> Option<PathBuf> {
                self.0.strip_prefix(&prefix.0).ok().map(Path::to_path_buf)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0.display())
            }
        }

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $name {
            fn cmp(&self, other: &Self) -> Ordering {
                self.0.cmp(&other.0)
            }
        }

        impl AsRef<Path> for $name {
            fn as_ref(&self) -> &Path {
                &self.0
            }
        }
    };
}

path_newtype!(
    /// A client-supplied path in the logical (storage-area) namespace.
    LogicalPath
);

path_newtype!(
    /// A path in the local filesystem namespace, resolved from a [`LogicalPath`].
    PhysicalPath
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_dot_components() {
        let p = LogicalPath::new("/a/./b/../c");
        assert_eq!(p.as_path(), Path::new("/a/c"));
    }

    #[test]
    fn display_matches_path() {
        let p = PhysicalPath::new("/data/x");
        assert_eq!(p.to_string(), "/data/x");
    }

    #[test]
    fn strip_prefix_returns_suffix() {
        let base = LogicalPath::new("/vo/prefix");
        let full = LogicalPath::new("/vo/prefix/file.dat");
        assert_eq!(full.strip_prefix(&base), Some(PathBuf::from("file.dat")));
    }

    #[test]
    fn logical_and_physical_are_distinct_types() {
        // This test exists purely to document intent: the following would not
        // compile if uncommented, since LogicalPath and PhysicalPath are
        // unrelated types.
        // let _: LogicalPath = PhysicalPath::new("/x");
        let _logical = LogicalPath::new("/x");
        let _physical = PhysicalPath::new("/x");
    }

    #[test]
    fn round_trips_through_serde() {
        let p = LogicalPath::new("/vo/a/b");
        let json = serde_json::to_string(&p).unwrap();
        let back: LogicalPath = serde_json::from_str(&json).unwrap();
        assert_eq!(p, back);
    }
}
