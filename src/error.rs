use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestdError {
    /// The lease store could not be reached or answered with a transport-level
    /// failure. Distinct from a legitimate "lock held by someone else" result:
    /// callers must never conflate "I don't hold it" with "I couldn't check."
    #[error("lease store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("invalid trigger rule: {0}")]
    InvalidTrigger(String),
}

pub type Result<T> = std::result::Result<T, IngestdError>;
