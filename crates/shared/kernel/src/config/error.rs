use std::borrow::Cow;

/// Every way a YAML startup configuration can fail to become a usable
/// [`super::Configuration`] — raw deserialization as well as the hand-written
/// cross-field checks `serde` cannot express.
#[storm_tape_derive::storm_error]
pub enum ConfigurationError {
    #[error("failed to load configuration{}: {source}", format_context(.context))]
    Load { source: config::ConfigError, context: Option<Cow<'static, str>> },

    #[error("invalid configuration{}: {message}", format_context(.context))]
    Invalid { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    #[error("storage area root is not usable{}: {source}", format_context(.context))]
    RootProbe { source: storm_tape_storage::ProbeError, context: Option<Cow<'static, str>> },
}

impl ConfigurationError {
    pub fn invalid(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Invalid { message: message.into(), context: None }
    }
}
