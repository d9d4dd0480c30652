use thiserror::Error;

/// Error classes from the error-handling design, each with its own
/// propagation rule. Transient store failures are retried by the caller
/// (see `retry`); everything else here is what survives retries or fails
/// fast.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("store error after retries exhausted: {0}")]
    PersistentStore(String),

    #[error("disk space below threshold, persist skipped: {0}")]
    DiskSpace(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
