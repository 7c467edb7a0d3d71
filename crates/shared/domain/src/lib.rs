//! Pure domain models for the tape-recall lifecycle.
//!
//! Nothing in this crate touches the filesystem, a database, or the
//! network; it exists so every other crate in the workspace can share one
//! vocabulary (`Stage`, `File`, `Locality`, `StorageArea`, and the
//! `LogicalPath`/`PhysicalPath` newtypes) without depending on each other's
//! infrastructure choices.

mod file;
mod locality;
mod path;
mod stage;
mod storage_area;

pub use file::{File, FileState};
pub use locality::Locality;
pub use path::{LogicalPath, PhysicalPath};
pub use stage::Stage;
pub use storage_area::StorageArea;
