use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("slice mismatch: expected {expected}, got {actual}")]
    SliceMismatch {
        expected: &'static str,
        actual: &'static str,
    },
}
