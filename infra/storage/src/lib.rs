//! Extended-attribute probing of files managed by a tape-backed HSM.
//!
//! This crate knows exactly three facts about a file on local disk: whether
//! a recall agent is actively restoring it (`user.TSMRecT`), whether it has
//! a tape copy (`user.storm.migrated`), and whether its blocks have been
//! reclaimed (stat's allocated-block count vs. its reported size). Everything
//! the rest of the workspace needs to know about locality is derived from
//! those three facts elsewhere; this crate never computes a `Locality`
//! itself.

mod error;
mod probe;

pub use error::ProbeError;
pub use probe::{probe_write_permissions, FakeStorage, FileSizeInfo, LocalStorage, Probe};
