use thiserror::Error;

use crate::MAX_CHUNK_SIZE;

pub type CodecResult<T> = Result<T, CodecError>;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid video key: {0}")]
    InvalidKey(String),

    #[error("invalid chunk size {0}: must be between 1 and {MAX_CHUNK_SIZE}")]
    InvalidChunkSize(usize),

    #[error("framing corruption: {0}")]
    Framing(String),

    #[error("authentication failed for chunk {index}: ciphertext tampered, truncated, or wrong key")]
    Authentication { index: u64 },

    #[error("chunk {index} encryption failed")]
    Encryption { index: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    /// True when the stored ciphertext itself is damaged or forged.
    pub fn is_integrity_fault(&self) -> bool {
        matches!(
            self,
            CodecError::Framing(_) | CodecError::Authentication { .. }
        )
    }
}
