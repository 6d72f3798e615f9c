//! Store error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("store unavailable")]
    Unavailable,
}

impl From<StoreError> for devex_core::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => devex_core::Error::NotFound(what),
            other => devex_core::Error::Store(other.to_string()),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
