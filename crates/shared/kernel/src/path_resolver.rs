use std::borrow::Cow;

use storm_tape_domain::{LogicalPath, PhysicalPath, StorageArea};

/// Resolves a client-supplied [`LogicalPath`] to the [`PhysicalPath`] it maps
/// to, by finding the storage area whose access-point list contains the
/// longest matching prefix of the logical path.
///
/// Immutable once built from a validated configuration; cheap to `Clone`
/// (an `Arc` around the area table) and safe to share across every request
/// handler.
#[derive(Debug, Clone)]
pub struct PathResolver {
    areas: std::sync::Arc<Vec<StorageArea>>,
}

/// No storage area's access points are a prefix of the given logical path.
#[storm_tape_derive::storm_error]
pub enum PathResolverError {
    #[error("no storage area matches '{path}'{}", format_context(.context))]
    NoStorageArea { path: String, context: Option<Cow<'static, str>> },
}

impl PathResolver {
    #[must_use]
    pub fn new(areas: Vec<StorageArea>) -> Self {
        Self { areas: std::sync::Arc::new(areas) }
    }

    /// Resolves `logical` against the longest matching access point across
    /// every configured storage area, not just the first area that matches.
    pub fn resolve(&self, logical: &LogicalPath) -> Result<PhysicalPath, PathResolverError> {
        let mut best: Option<(&StorageArea, &LogicalPath)> = None;

        for area in self.areas.iter() {
            if let Some(access_point) = area.longest_matching_access_point(logical) {
                let is_longer = best
                    .is_none_or(|(_, current)| access_point.as_path().as_os_str().len() > current.as_path().as_os_str().len());
                if is_longer {
                    best = Some((area, access_point));
                }
            }
        }

        let (area, access_point) = best.ok_or_else(|| PathResolverError::NoStorageArea {
            path: logical.to_string(),
            context: None,
        })?;

        let suffix = logical.strip_prefix(access_point).unwrap_or_default();
        Ok(PhysicalPath::new(area.root.as_path().join(suffix)))
    }

    #[must_use]
    pub fn storage_areas(&self) -> &[StorageArea] {
        &self.areas
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn area(name: &str, root: &str, access_points: &[&str]) -> StorageArea {
        StorageArea::new(
            name,
            PhysicalPath::new(root),
            access_points.iter().map(LogicalPath::new).collect(),
        )
    }

    #[test]
    fn resolves_via_matching_access_point() {
        let resolver = PathResolver::new(vec![area("vo", "/data/vo", &["/vo"])]);
        let resolved = resolver.resolve(&LogicalPath::new("/vo/file.dat")).unwrap();
        assert_eq!(resolved.as_path(), std::path::Path::new("/data/vo/file.dat"));
    }

    #[test]
    fn prefers_longest_access_point_across_areas() {
        let resolver = PathResolver::new(vec![
            area("vo", "/data/vo", &["/vo"]),
            area("vo-nested", "/data/vo-nested", &["/vo/nested"]),
        ]);
        let resolved = resolver.resolve(&LogicalPath::new("/vo/nested/file.dat")).unwrap();
        assert_eq!(resolved.as_path(), std::path::Path::new("/data/vo-nested/file.dat"));
    }

    #[test]
    fn fails_when_no_area_matches() {
        let resolver = PathResolver::new(vec![area("vo", "/data/vo", &["/vo"])]);
        assert!(resolver.resolve(&LogicalPath::new("/other/file.dat")).is_err());
    }
}
