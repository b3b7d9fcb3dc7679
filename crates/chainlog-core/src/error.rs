//! Error types for the chainlog core.

use thiserror::Error;

/// Errors raised while building, canonicalizing, or decoding entries.
///
/// Everything here is detected before an entry touches a chain: the pipeline
/// maps these to an `InvalidPayload` rejection.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("invalid stream name {name:?}: {reason}")]
    InvalidStream { name: String, reason: &'static str },

    #[error("invalid entry id {id:?}: {reason}")]
    InvalidId { id: String, reason: &'static str },

    #[error("invalid key id {0:?}")]
    InvalidKeyId(String),

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("unknown signing key: {0}")]
    UnknownKey(String),

    #[error("no signing material for key: {0}")]
    KeyNotSigning(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

impl CoreError {
    /// Whether the error describes caller input that can never be chained.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidPayload(_)
                | CoreError::InvalidStream { .. }
                | CoreError::InvalidId { .. }
        )
    }
}
