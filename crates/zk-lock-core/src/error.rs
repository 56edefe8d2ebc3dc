//! Error types for distributed lock operations.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during lock operations.
#[derive(Error, Debug)]
pub enum LockError {
    /// Lock acquisition timed out.
    ///
    /// Returned only by `acquire`-style operations; `try_acquire` variants
    /// report ordinary contention as `Ok(None)` instead.
    #[error("lock acquisition timed out after {0:?}")]
    Timeout(Duration),

    /// Lock operation was cancelled by the caller.
    ///
    /// Always distinct from [`LockError::Timeout`]: a cancelled wait never
    /// reports itself as a timeout, even if the deadline was close.
    #[error("lock operation was cancelled")]
    Cancelled,

    /// The coordination session expired or disconnected.
    ///
    /// Any ephemeral nodes owned by the session are gone; held handles fire
    /// their lost token.
    #[error("coordination session lost: {0}")]
    SessionLost(String),

    /// The caller's own node vanished while still expected to exist.
    ///
    /// This indicates external interference with the lock's node tree and is
    /// a hard, non-retriable error.
    #[error("lock node unexpectedly lost: {0}")]
    NodeLost(String),

    /// Invalid node path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Invalid lock name.
    #[error("invalid lock name: {0}")]
    InvalidName(String),

    /// Initial connection to the coordination service did not complete in
    /// time. Distinct from [`LockError::SessionLost`], which covers an
    /// established session failing later.
    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Backend-specific error.
    #[error("backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Result type for lock operations.
pub type LockResult<T> = Result<T, LockError>;
