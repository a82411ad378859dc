//! The process-wide video encryption key

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use crate::error::{CodecError, CodecResult};
use crate::KEY_SIZE;

/// A 256-bit symmetric key for video encryption. Zeroized on drop.
#[derive(Clone)]
pub struct VideoKey {
    bytes: [u8; KEY_SIZE],
}

impl VideoKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Decode a base64 secret (URL-safe or standard alphabet, padded).
    pub fn from_base64(secret: &SecretString) -> CodecResult<Self> {
        let encoded = secret.expose_secret().trim();
        let mut decoded = URL_SAFE
            .decode(encoded)
            .or_else(|_| STANDARD.decode(encoded))
            .map_err(|e| CodecError::InvalidKey(format!("not valid base64: {e}")))?;

        if decoded.len() != KEY_SIZE {
            let len = decoded.len();
            decoded.zeroize();
            return Err(CodecError::InvalidKey(format!(
                "expected {KEY_SIZE} bytes, got {len}"
            )));
        }

        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self::from_bytes(bytes))
    }
}

impl Drop for VideoKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for VideoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a fresh random video secret, URL-safe base64 encoded.
pub fn generate_video_secret() -> SecretString {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    let encoded = URL_SAFE.encode(bytes);
    bytes.zeroize();
    SecretString::from(encoded)
}
