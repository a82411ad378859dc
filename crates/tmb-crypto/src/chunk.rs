//! Per-chunk XChaCha20-Poly1305 sealing
//!
//! Sealed chunk format (binary):
//! ```text
//! [24 bytes: random nonce][N bytes: ciphertext][16 bytes: Poly1305 tag]
//! AAD = chunk_index (8 bytes, big-endian) || final flag (1 byte: 0x00 / 0x01)
//! ```
//!
//! The AAD binds each chunk to its position in the file and marks the last
//! one, so reordered, dropped, or truncated-away chunks fail authentication.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::error::{CodecError, CodecResult};
use crate::key::VideoKey;
use crate::{CHUNK_OVERHEAD, NONCE_SIZE};

/// Seal one plaintext chunk. Returns `[nonce][ciphertext][tag]`.
pub fn seal_chunk(
    key: &VideoKey,
    index: u64,
    is_final: bool,
    plaintext: &[u8],
) -> CodecResult<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let aad = build_aad(index, is_final);
    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: &aad,
            },
        )
        .map_err(|_| CodecError::Encryption { index })?;

    let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Open one sealed chunk produced by [`seal_chunk`].
pub fn open_chunk(
    key: &VideoKey,
    index: u64,
    is_final: bool,
    sealed: &[u8],
) -> CodecResult<Vec<u8>> {
    if sealed.len() < CHUNK_OVERHEAD {
        return Err(CodecError::Framing(format!(
            "chunk {index} too short: {} bytes (minimum {CHUNK_OVERHEAD})",
            sealed.len()
        )));
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
    let nonce = XNonce::from_slice(nonce_bytes);
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    let aad = build_aad(index, is_final);
    cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad: &aad,
            },
        )
        .map_err(|_| CodecError::Authentication { index })
}

fn build_aad(index: u64, is_final: bool) -> [u8; 9] {
    let mut aad = [0u8; 9];
    aad[..8].copy_from_slice(&index.to_be_bytes());
    aad[8] = u8::from(is_final);
    aad
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KEY_SIZE;

    fn key(byte: u8) -> VideoKey {
        VideoKey::from_bytes([byte; KEY_SIZE])
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let k = key(1);
        let sealed = seal_chunk(&k, 3, false, b"infant video bytes").unwrap();
        let opened = open_chunk(&k, 3, false, &sealed).unwrap();
        assert_eq!(opened, b"infant video bytes");
    }

    #[test]
    fn test_sealed_size() {
        let sealed = seal_chunk(&key(1), 0, true, &[0u8; 1000]).unwrap();
        // nonce (24) + plaintext (1000) + tag (16)
        assert_eq!(sealed.len(), 1000 + CHUNK_OVERHEAD);
    }

    #[test]
    fn test_open_wrong_key() {
        let sealed = seal_chunk(&key(1), 0, true, b"secret").unwrap();
        let err = open_chunk(&key(2), 0, true, &sealed).unwrap_err();
        assert!(matches!(err, CodecError::Authentication { index: 0 }));
    }

    #[test]
    fn test_open_wrong_index() {
        let sealed = seal_chunk(&key(1), 0, false, b"secret").unwrap();
        assert!(
            open_chunk(&key(1), 1, false, &sealed).is_err(),
            "wrong chunk index must fail (AAD mismatch)"
        );
    }

    #[test]
    fn test_open_wrong_final_flag() {
        let sealed = seal_chunk(&key(1), 4, false, b"secret").unwrap();
        assert!(
            open_chunk(&key(1), 4, true, &sealed).is_err(),
            "a non-final chunk must not open as the last one"
        );
    }

    #[test]
    fn test_tampered_ciphertext() {
        let mut sealed = seal_chunk(&key(1), 0, true, b"secret data").unwrap();
        sealed[NONCE_SIZE + 1] ^= 0x01;
        assert!(open_chunk(&key(1), 0, true, &sealed).is_err());
    }

    #[test]
    fn test_too_short_is_framing_fault() {
        let err = open_chunk(&key(1), 0, true, &[0u8; 10]).unwrap_err();
        assert!(matches!(err, CodecError::Framing(_)));
    }
}
