//! The request lifecycle engine: probing filesystem state into a
//! [`storm_tape_domain::Locality`], observing a Stage's files forward
//! through their state machine, handing eligible files to the recaller,
//! and the public request operations built on top of both.

mod api;
mod lifecycle;
mod recall;
mod status;

pub use api::{ArchiveInfoEntry, RequestApi, StageView, StatusFile};
pub use lifecycle::LifecycleEngine;
pub use recall::RecallHandoff;
pub use status::{externalize, ExtendedFileStatus};
