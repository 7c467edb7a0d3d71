//! Loads and validates the YAML startup configuration.
//!
//! Deserialization alone cannot express the cross-field invariants this
//! service relies on (unique storage-area names, non-overlapping access
//! points, a sane port/log-level range); [`load_and_validate`] layers
//! hand-written checks on top of a plain `serde` pass, mirroring what the
//! upstream configuration loader enforces by hand rather than through types.

mod error;

use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use storm_tape_domain::{LogicalPath, PhysicalPath, StorageArea};
use storm_tape_storage::Probe;
use tracing::info;

pub use error::ConfigurationError;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_LOG_LEVEL: u8 = 1;
const DEFAULT_CONCURRENCY: usize = 1;
const DEFAULT_READ_POOL_SIZE: usize = 4;
const DEFAULT_SERVICE_NAME: &str = "storm-tape";

fn storage_area_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9._-]*$").expect("static regex is valid"))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawAccessPoint {
    One(String),
    Many(Vec<String>),
}

impl RawAccessPoint {
    fn into_strings(self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s],
            Self::Many(v) => v,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawStorageArea {
    name: String,
    root: PathBuf,
    #[serde(rename = "access-point")]
    access_point: RawAccessPoint,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct RawTelemetry {
    #[serde(rename = "service-name")]
    service_name: Option<String>,
    #[serde(rename = "tracing-endpoint")]
    tracing_endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawConfiguration {
    port: Option<i64>,
    #[serde(rename = "log-level")]
    log_level: Option<i64>,
    #[serde(rename = "mirror-mode")]
    mirror_mode: Option<bool>,
    concurrency: Option<i64>,
    #[serde(rename = "database-path")]
    database_path: Option<PathBuf>,
    #[serde(rename = "read-pool-size")]
    read_pool_size: Option<i64>,
    telemetry: Option<RawTelemetry>,
    #[serde(rename = "storage-areas")]
    storage_areas: Vec<RawStorageArea>,
}

/// The validated startup configuration.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub port: u16,
    /// Crow-style level: 0 Debug, 1 Info, 2 Warning, 3 Error, 4 Critical.
    pub log_level: u8,
    pub mirror_mode: bool,
    pub concurrency: usize,
    /// `None` means "colocate `storm-tape.sqlite` next to the config file",
    /// resolved by the caller once the config file's own path is known.
    pub database_path: Option<PathBuf>,
    pub read_pool_size: usize,
    pub telemetry: Option<TelemetryConfiguration>,
    pub storage_areas: Vec<StorageArea>,
}

#[derive(Debug, Clone)]
pub struct TelemetryConfiguration {
    pub service_name: String,
    pub tracing_endpoint: Option<String>,
}

/// Loads `path` as YAML, overlays `STORM_TAPE__`-prefixed environment
/// variables (double underscore for nesting, e.g. `STORM_TAPE__PORT=9000`),
/// and validates the result. When `mirror_mode` ends up `false`, each
/// storage area's root is additionally probed for write and xattr support
/// via `probe`.
pub fn load_and_validate(path: impl AsRef<Path>, probe: &dyn Probe) -> Result<Configuration, ConfigurationError> {
    let path = path.as_ref();
    info!(path = %path.display(), "loading configuration");

    let raw: RawConfiguration = Config::builder()
        .add_source(File::from(path).format(FileFormat::Yaml).required(true))
        .add_source(Environment::with_prefix("STORM_TAPE").separator("__").convert_case(config::Case::Snake))
        .build()
        .map_err(|source| ConfigurationError::Load { source, context: None })?
        .try_deserialize()
        .map_err(|source| ConfigurationError::Load { source, context: None })?;

    validate(raw, probe)
}

fn validate(raw: RawConfiguration, probe: &dyn Probe) -> Result<Configuration, ConfigurationError> {
    let port = match raw.port {
        None => DEFAULT_PORT,
        Some(p) if (1..65536).contains(&p) => p as u16,
        Some(_) => return Err(ConfigurationError::invalid("invalid 'port' entry in configuration")),
    };

    let log_level = match raw.log_level {
        None => DEFAULT_LOG_LEVEL,
        Some(l) if (0..=4).contains(&l) => l as u8,
        Some(_) => return Err(ConfigurationError::invalid("invalid 'log-level' entry in configuration")),
    };

    let concurrency = match raw.concurrency {
        None => DEFAULT_CONCURRENCY,
        Some(c) if c > 0 => c as usize,
        Some(_) => return Err(ConfigurationError::invalid("invalid 'concurrency' entry in configuration")),
    };

    let read_pool_size = match raw.read_pool_size {
        None => DEFAULT_READ_POOL_SIZE,
        Some(n) if n > 0 => n as usize,
        Some(_) => return Err(ConfigurationError::invalid("invalid 'read-pool-size' entry in configuration")),
    };

    let mirror_mode = raw.mirror_mode.unwrap_or(false);

    let telemetry = raw.telemetry.map(validate_telemetry).transpose()?;

    let storage_areas = validate_storage_areas(raw.storage_areas, mirror_mode, probe)?;

    Ok(Configuration {
        port,
        log_level,
        mirror_mode,
        concurrency,
        database_path: raw.database_path,
        read_pool_size,
        telemetry,
        storage_areas,
    })
}

fn validate_telemetry(raw: RawTelemetry) -> Result<TelemetryConfiguration, ConfigurationError> {
    let service_name = match raw.service_name {
        None => DEFAULT_SERVICE_NAME.to_string(),
        Some(s) if !s.is_empty() => s,
        Some(_) => return Err(ConfigurationError::invalid("'service-name' is not a valid string")),
    };

    let tracing_endpoint = raw.tracing_endpoint.map(|endpoint| validate_tracing_endpoint(&endpoint)).transpose()?;

    Ok(TelemetryConfiguration { service_name, tracing_endpoint })
}

fn validate_tracing_endpoint(endpoint: &str) -> Result<String, ConfigurationError> {
    let url = url::Url::parse(endpoint)
        .map_err(|_| ConfigurationError::invalid("'tracing-endpoint' is not a valid uri"))?;

    match url.scheme() {
        "http" | "https" => {
            if url.host_str().is_none_or(str::is_empty) {
                return Err(ConfigurationError::invalid("'tracing-endpoint' has no hostname or address"));
            }
        }
        "file" => {}
        other => {
            return Err(ConfigurationError::invalid(format!("'tracing-endpoint' uri scheme '{other}' is not valid")))
        }
    }

    Ok(endpoint.to_string())
}

fn validate_storage_areas(
    raw: Vec<RawStorageArea>,
    mirror_mode: bool,
    probe: &dyn Probe,
) -> Result<Vec<StorageArea>, ConfigurationError> {
    if raw.is_empty() {
        return Err(ConfigurationError::invalid("configuration error - empty 'storage-areas' entry"));
    }

    let mut areas = raw.into_iter().map(build_storage_area).collect::<Result<Vec<_>, _>>()?;

    areas.sort_by(|l, r| l.name.to_lowercase().cmp(&r.name.to_lowercase()));

    for window in areas.windows(2) {
        if window[0].name.eq_ignore_ascii_case(&window[1].name) {
            return Err(ConfigurationError::invalid(format!(
                "two storage areas have the same name '{}'",
                window[0].name
            )));
        }
    }

    let mut access_points: Vec<(&LogicalPath, &str)> =
        areas.iter().flat_map(|sa| sa.access_points.iter().map(move |ap| (ap, sa.name.as_str()))).collect();
    access_points.sort_by(|l, r| l.0.cmp(r.0));

    for window in access_points.windows(2) {
        if window[0].0 == window[1].0 {
            return Err(ConfigurationError::invalid(format!(
                "storage areas '{}' and '{}' have the access point '{}' in common",
                window[0].1, window[1].1, window[0].0
            )));
        }
    }

    if let Some((path, owner)) = access_points.iter().find(|(ap, _)| ap.as_path().is_relative()) {
        return Err(ConfigurationError::invalid(format!(
            "access point '{path}' of storage area '{owner}' is not an absolute path"
        )));
    }

    for area in &areas {
        check_root(area, mirror_mode, probe)?;
    }

    Ok(areas)
}

fn build_storage_area(raw: RawStorageArea) -> Result<StorageArea, ConfigurationError> {
    if raw.name.is_empty() {
        return Err(ConfigurationError::invalid("there is a storage area with an empty string name"));
    }
    if !storage_area_name_pattern().is_match(&raw.name) {
        return Err(ConfigurationError::invalid(format!("invalid storage area name '{}'", raw.name)));
    }

    let access_points = raw
        .access_point
        .into_strings()
        .into_iter()
        .map(LogicalPath::new)
        .collect::<Vec<_>>();
    if access_points.is_empty() {
        return Err(ConfigurationError::invalid(format!("storage area '{}' has an empty access-point", raw.name)));
    }

    Ok(StorageArea::new(raw.name, PhysicalPath::new(raw.root), access_points))
}

fn check_root(area: &StorageArea, mirror_mode: bool, probe: &dyn Probe) -> Result<(), ConfigurationError> {
    let root = area.root.as_path();

    if root.is_relative() {
        return Err(ConfigurationError::invalid(format!(
            "root '{}' of storage area '{}' is not an absolute path",
            area.root, area.name
        )));
    }

    let metadata = std::fs::metadata(root).map_err(|_| {
        ConfigurationError::invalid(format!("root '{}' of storage area '{}' does not exist", area.root, area.name))
    })?;

    if !metadata.is_dir() {
        return Err(ConfigurationError::invalid(format!(
            "root '{}' of storage area '{}' is not a directory",
            area.root, area.name
        )));
    }

    if !mirror_mode {
        storm_tape_storage::probe_write_permissions(probe, root).map_err(|source| ConfigurationError::RootProbe {
            source,
            context: Some(format!("root '{}' of storage area '{}' has invalid permissions", area.root, area.name).into()),
        })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use storm_tape_storage::LocalStorage;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("storm-tape.yaml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn loads_minimal_configuration() {
        let tmp = tempfile::tempdir().unwrap();
        let area_root = tmp.path().join("vo");
        std::fs::create_dir(&area_root).unwrap();

        let body = format!(
            "storage-areas:\n  - name: vo\n    root: {}\n    access-point: /vo\nmirror-mode: true\n",
            area_root.display()
        );
        let path = write_config(tmp.path(), &body);

        let config = load_and_validate(&path, &LocalStorage::new()).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.storage_areas.len(), 1);
        assert_eq!(config.storage_areas[0].name, "vo");
    }

    #[test]
    fn rejects_duplicate_storage_area_names() {
        let tmp = tempfile::tempdir().unwrap();
        let root_a = tmp.path().join("a");
        let root_b = tmp.path().join("b");
        std::fs::create_dir(&root_a).unwrap();
        std::fs::create_dir(&root_b).unwrap();

        let body = format!(
            "mirror-mode: true\nstorage-areas:\n  - name: VO\n    root: {}\n    access-point: /vo\n  - name: vo\n    root: {}\n    access-point: /other\n",
            root_a.display(),
            root_b.display()
        );
        let path = write_config(tmp.path(), &body);

        let err = load_and_validate(&path, &LocalStorage::new()).unwrap_err();
        assert!(matches!(err, ConfigurationError::Invalid { .. }));
    }

    #[test]
    fn rejects_overlapping_access_points() {
        let tmp = tempfile::tempdir().unwrap();
        let root_a = tmp.path().join("a");
        let root_b = tmp.path().join("b");
        std::fs::create_dir(&root_a).unwrap();
        std::fs::create_dir(&root_b).unwrap();

        let body = format!(
            "mirror-mode: true\nstorage-areas:\n  - name: a\n    root: {}\n    access-point: /vo\n  - name: b\n    root: {}\n    access-point: /vo\n",
            root_a.display(),
            root_b.display()
        );
        let path = write_config(tmp.path(), &body);

        let err = load_and_validate(&path, &LocalStorage::new()).unwrap_err();
        assert!(matches!(err, ConfigurationError::Invalid { .. }));
    }

    #[test]
    fn rejects_invalid_storage_area_name() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("vo");
        std::fs::create_dir(&root).unwrap();

        let body = format!(
            "mirror-mode: true\nstorage-areas:\n  - name: \"1-bad\"\n    root: {}\n    access-point: /vo\n",
            root.display()
        );
        let path = write_config(tmp.path(), &body);

        let err = load_and_validate(&path, &LocalStorage::new()).unwrap_err();
        assert!(matches!(err, ConfigurationError::Invalid { .. }));
    }

    #[test]
    fn rejects_out_of_range_port() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("vo");
        std::fs::create_dir(&root).unwrap();

        let body = format!(
            "port: 70000\nmirror-mode: true\nstorage-areas:\n  - name: vo\n    root: {}\n    access-point: /vo\n",
            root.display()
        );
        let path = write_config(tmp.path(), &body);

        let err = load_and_validate(&path, &LocalStorage::new()).unwrap_err();
        assert!(matches!(err, ConfigurationError::Invalid { .. }));
    }

    #[test]
    fn accepts_multiple_access_points() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("vo");
        std::fs::create_dir(&root).unwrap();

        let body = format!(
            "mirror-mode: true\nstorage-areas:\n  - name: vo\n    root: {}\n    access-point: [/vo, /vo2]\n",
            root.display()
        );
        let path = write_config(tmp.path(), &body);

        let config = load_and_validate(&path, &LocalStorage::new()).unwrap();
        assert_eq!(config.storage_areas[0].access_points.len(), 2);
    }

    #[test]
    fn validates_telemetry_tracing_endpoint_scheme() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("vo");
        std::fs::create_dir(&root).unwrap();

        let body = format!(
            "mirror-mode: true\ntelemetry:\n  tracing-endpoint: ftp://example.org\nstorage-areas:\n  - name: vo\n    root: {}\n    access-point: /vo\n",
            root.display()
        );
        let path = write_config(tmp.path(), &body);

        let err = load_and_validate(&path, &LocalStorage::new()).unwrap_err();
        assert!(matches!(err, ConfigurationError::Invalid { .. }));
    }
}
