use std::borrow::Cow;

/// Every way the request store can fail, from schema bootstrap through a
/// single writer-thread transaction.
#[storm_tape_derive::storm_error]
pub enum StoreError {
    #[error("sqlite error{}: {source}", format_context(.context))]
    Sqlite { source: rusqlite::Error, context: Option<Cow<'static, str>> },

    #[error("stage '{id}' not found")]
    NotFound { id: String },

    #[error("the request store writer thread has shut down")]
    WriterGone,

    #[error("internal request store error{}: {message}", format_context(.context))]
    Internal { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}
