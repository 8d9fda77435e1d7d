use thiserror::Error;

use crate::types::SessionId;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("out of memory")]
    OutOfMemory,

    #[error("no session for {0}")]
    NoSession(SessionId),

    #[error("session {0} not found")]
    NotFound(SessionId),

    #[error("session {0} already has a request in flight")]
    Busy(SessionId),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

impl CryptoError {
    /// Shorthand for [`CryptoError::InvalidArgument`].
    pub fn invalid(msg: impl Into<String>) -> Self {
        CryptoError::InvalidArgument(msg.into())
    }
}
