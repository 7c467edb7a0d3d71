use std::borrow::Cow;
use std::path::PathBuf;

/// A specialized `ProbeError` enum of this crate.
#[storm_tape_derive::storm_error]
pub enum ProbeError {
    #[error("stat failed on {path}{}: {source}", format_context(.context))]
    Stat { path: PathBuf, source: std::io::Error, context: Option<Cow<'static, str>> },

    #[error("extended attribute lookup failed on {path}{}: {source}", format_context(.context))]
    Xattr { path: PathBuf, source: std::io::Error, context: Option<Cow<'static, str>> },

    #[error("{path} is not a regular file{}", format_context(.context))]
    NotARegularFile { path: PathBuf, context: Option<Cow<'static, str>> },
}
