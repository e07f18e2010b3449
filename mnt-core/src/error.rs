use thiserror::Error;

/// Misuse of a [`crate::lock::ReentrantTrackedLock`]. Always a caller bug.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("lock '{lock}' released by a thread that does not hold it (held by {holder})")]
    NotOwner { lock: String, holder: String },

    #[error("lock '{lock}' released but it is not held")]
    NotHeld { lock: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("cache session is already active")]
    AlreadyActive,

    #[error("cache session is not active")]
    NotActive,

    #[error("cache location is empty")]
    EmptyLocation,

    #[error("cursor not acquired")]
    CursorNotAcquired,

    #[error("cannot {0} without an acquired cursor")]
    NoCursor(&'static str),

    #[error("cache store error: {0}")]
    Store(String),

    #[error(transparent)]
    Lock(#[from] LockError),
}

impl CacheError {
    /// Usage errors are caller bugs, as opposed to failures reported by the store.
    pub fn is_usage_error(&self) -> bool {
        !matches!(self, CacheError::Store(_))
    }
}

/// Failure of an interactive prompt requested from a worker thread.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PromptError {
    #[error("prompt cancelled by the user")]
    Cancelled,

    #[error("prompt failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("an application context is already alive in this process")]
    AlreadyExists,

    #[error("failed to prepare directory {0}")]
    Directory(String),

    #[error(transparent)]
    Cache(#[from] CacheError),
}
