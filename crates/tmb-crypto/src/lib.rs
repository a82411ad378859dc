//! tmb-crypto: encryption at rest for uploaded videos
//!
//! Architecture: fixed-size chunks, each sealed independently with
//! XChaCha20-Poly1305 and framed with a little-endian length prefix.
//!
//! ```text
//! plaintext ──read chunk_size──► seal(index, final?) ──► [u32 LE len][nonce ‖ ciphertext ‖ tag]
//!     │                                                        │
//!     └── SHA-256 (plaintext digest)          SHA-256 (ciphertext digest) ──┘
//! ```
//!
//! The file has no header, footer or magic bytes: it is a bare sequence of
//! frames terminated by EOF at a length-prefix boundary.

pub mod chunk;
pub mod codec;
pub mod digest;
pub mod error;
pub mod key;

pub use chunk::{open_chunk, seal_chunk};
pub use codec::{ChunkedCipher, DecryptOutcome, EncryptOutcome};
pub use digest::{sha256_file, sha256_hex, IntegrityHasher};
pub use error::{CodecError, CodecResult};
pub use key::{generate_video_secret, VideoKey};

/// Size of the video key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of the little-endian frame length prefix
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Bytes a sealed chunk adds on top of its plaintext
pub const CHUNK_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

/// Largest plaintext chunk the codec accepts (256 MiB)
pub const MAX_CHUNK_SIZE: usize = 256 * 1024 * 1024;
