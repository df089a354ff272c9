use async_trait::async_trait;
use thiserror::Error;

/// Write capability handed to the scheduler by the caller.
///
/// The backend is an opaque, possibly slow, possibly failing external
/// resource. The scheduler never assumes it tolerates concurrent calls for
/// the same session; serialization happens on the scheduler side.
#[async_trait]
pub trait PersistBackend<S>: Send + Sync {
    async fn persist(&self, snapshot: &S) -> Result<(), PersistError>;
}

/// Uniform failure reported by a persistence backend.
///
/// Constraint violations, I/O errors, and connectivity loss all collapse
/// into this one variant at the scheduler boundary; the distinction only
/// matters to the backend's own logs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("persist failed: {0}")]
pub struct PersistError(pub String);

impl PersistError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
