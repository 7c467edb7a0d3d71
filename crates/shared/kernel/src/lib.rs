//! Configuration, path resolution, and the HTTP error envelope shared by
//! every feature slice and the server binary.

pub mod config;
mod path_resolver;
mod problem;

pub use config::{ConfigurationError, Configuration, TelemetryConfiguration};
pub use path_resolver::{PathResolver, PathResolverError};
pub use problem::ApiError;
