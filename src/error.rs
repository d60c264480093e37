use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("no fit: {0}")]
    NoFit(String),

    #[error("already present: {0}")]
    AlreadyPresent(String),

    #[error("malformed key: {0}")]
    Malformed(String),

    #[error("no such entry")]
    NoSuchEntry,

    #[error("corruption detected: {0}")]
    Corruption(String),

    #[error("bucket too small: {0}")]
    TooSmall(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Wire-level status codes used by callers that speak the classic
/// integer-return protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Error,
    Declined,
    Busy,
    Again,
}

impl CoreError {
    /// Maps an error onto its status code: duplicates report `Busy`,
    /// malformed keys and misses on the oversize list report `Declined`
    /// (not an error for the caller), everything else is `Error`.
    pub fn status(&self) -> Status {
        match self {
            CoreError::AlreadyPresent(_) => Status::Busy,
            CoreError::Malformed(_) | CoreError::NoSuchEntry => Status::Declined,
            _ => Status::Error,
        }
    }
}
