//! The error taxonomy every crate in the workspace maps its local errors
//! into at the boundary the task queue inspects for retryability.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AethError>;

/// The eight error kinds named by the design: classification, not message
/// text, drives retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Invalid,
    Unavailable,
    Timeout,
    Exhausted,
    Internal,
    SecurityPolicy,
}

impl ErrorKind {
    /// `Unavailable`, `Timeout`, and `Exhausted` are retryable under the
    /// task's retry budget; everything else is terminal.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Unavailable | Self::Timeout | Self::Exhausted)
    }
}

#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct AethError {
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    source: Option<anyhow::Error>,
}

impl AethError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Invalid, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Exhausted, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn security_policy(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SecurityPolicy, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}
