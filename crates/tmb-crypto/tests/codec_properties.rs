//! Property tests for the framed chunk codec.
//!
//! Covers the round-trip, digest, framing-length and tamper-detection
//! properties across empty, partial, exact and multi-chunk inputs.

use proptest::prelude::*;
use tmb_crypto::{
    sha256_hex, ChunkedCipher, CodecError, VideoKey, CHUNK_OVERHEAD, LENGTH_PREFIX_SIZE,
};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime")
}

fn cipher(chunk_size: usize) -> ChunkedCipher {
    ChunkedCipher::new(VideoKey::from_bytes([0x42u8; 32]), chunk_size).expect("cipher")
}

async fn encrypt(c: &ChunkedCipher, data: &[u8]) -> (Vec<u8>, tmb_crypto::EncryptOutcome) {
    let mut reader = data;
    let mut out = Vec::new();
    let outcome = c.encrypt_stream(&mut reader, &mut out).await.expect("encrypt");
    (out, outcome)
}

async fn decrypt(c: &ChunkedCipher, framed: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut reader = framed;
    let mut out = Vec::new();
    c.decrypt_stream(&mut reader, &mut out).await?;
    Ok(out)
}

/// Walk the frames and return each sealed chunk length.
fn frame_lengths(framed: &[u8]) -> Vec<usize> {
    let mut lens = Vec::new();
    let mut pos = 0;
    while pos < framed.len() {
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        prefix.copy_from_slice(&framed[pos..pos + LENGTH_PREFIX_SIZE]);
        let len = u32::from_le_bytes(prefix) as usize;
        lens.push(len);
        pos += LENGTH_PREFIX_SIZE + len;
    }
    assert_eq!(pos, framed.len(), "frames must tile the file exactly");
    lens
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn roundtrip_any_input(
        data in proptest::collection::vec(any::<u8>(), 0..=4096),
        chunk_size in 1usize..=1024,
    ) {
        let rt = runtime();
        let c = cipher(chunk_size);
        let (framed, outcome) = rt.block_on(encrypt(&c, &data));

        prop_assert_eq!(&outcome.plaintext_sha256, &sha256_hex(&data));
        prop_assert_eq!(outcome.plaintext_bytes, data.len() as u64);

        let plain = rt.block_on(decrypt(&c, &framed)).expect("decrypt");
        prop_assert_eq!(plain, data);
    }

    #[test]
    fn framing_length_invariant(
        data in proptest::collection::vec(any::<u8>(), 0..=2048),
        chunk_size in 1usize..=512,
    ) {
        let rt = runtime();
        let (framed, outcome) = rt.block_on(encrypt(&cipher(chunk_size), &data));

        let lens = frame_lengths(&framed);
        let expected_chunks = data.len().div_ceil(chunk_size);
        prop_assert_eq!(lens.len(), expected_chunks);
        prop_assert_eq!(outcome.chunks as usize, expected_chunks);

        let total: usize = lens.iter().map(|l| LENGTH_PREFIX_SIZE + l).sum();
        prop_assert_eq!(total, framed.len());

        for (i, len) in lens.iter().enumerate() {
            let plain_len = if i + 1 < lens.len() {
                chunk_size
            } else {
                data.len() - chunk_size * i
            };
            prop_assert_eq!(*len, plain_len + CHUNK_OVERHEAD);
        }
    }

    #[test]
    fn any_bit_flip_is_detected(
        data in proptest::collection::vec(any::<u8>(), 1..=600),
        chunk_size in 16usize..=200,
        position in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let rt = runtime();
        let c = cipher(chunk_size);
        let (mut framed, _) = rt.block_on(encrypt(&c, &data));

        let at = position.index(framed.len());
        framed[at] ^= 1 << bit;

        let result = rt.block_on(decrypt(&c, &framed));
        prop_assert!(result.is_err(), "flipping bit {} of byte {} went unnoticed", bit, at);
    }
}

#[test]
fn reencryption_differs_but_decrypts_identically() {
    let rt = runtime();
    let c = cipher(100);
    let data: Vec<u8> = (0u32..1000).map(|i| (i % 253) as u8).collect();

    let (a, outcome_a) = rt.block_on(encrypt(&c, &data));
    let (b, outcome_b) = rt.block_on(encrypt(&c, &data));

    assert_ne!(a, b, "fresh nonces must change the ciphertext");
    assert_ne!(outcome_a.ciphertext_sha256, outcome_b.ciphertext_sha256);
    assert_eq!(outcome_a.plaintext_sha256, outcome_b.plaintext_sha256);
    assert_eq!(a.len(), b.len());

    assert_eq!(rt.block_on(decrypt(&c, &a)).unwrap(), data);
    assert_eq!(rt.block_on(decrypt(&c, &b)).unwrap(), data);
}

#[test]
fn flipped_ciphertext_bit_is_authentication_fault() {
    let rt = runtime();
    let c = cipher(64);
    let (mut framed, _) = rt.block_on(encrypt(&c, &[7u8; 150]));

    // Inside the first sealed chunk, past its prefix and nonce
    framed[LENGTH_PREFIX_SIZE + 30] ^= 0x80;

    let err = rt.block_on(decrypt(&c, &framed)).unwrap_err();
    assert!(
        matches!(err, CodecError::Authentication { index: 0 }),
        "expected authentication fault, got {err:?}"
    );
}
