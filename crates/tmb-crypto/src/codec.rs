//! Streaming encrypt/decrypt over the framed chunk format
//!
//! On-disk layout:
//! ```text
//! repeat until EOF:
//!   [4 bytes: u32 LE frame length][frame length bytes: sealed chunk]
//! ```
//!
//! Neither direction buffers more than two chunks. The codec never deletes
//! partial output; rollback belongs to the caller.

use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

use crate::chunk::{open_chunk, seal_chunk};
use crate::digest::IntegrityHasher;
use crate::error::{CodecError, CodecResult};
use crate::key::VideoKey;
use crate::{CHUNK_OVERHEAD, LENGTH_PREFIX_SIZE, MAX_CHUNK_SIZE};

/// Result of encrypting a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptOutcome {
    /// SHA-256 of every plaintext byte read
    pub plaintext_sha256: String,
    /// SHA-256 of every `length prefix || sealed chunk` written
    pub ciphertext_sha256: String,
    pub plaintext_bytes: u64,
    /// Total bytes written, prefixes included
    pub ciphertext_bytes: u64,
    pub chunks: u64,
}

/// Result of decrypting a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptOutcome {
    pub plaintext_sha256: String,
    /// SHA-256 of the framed input as read
    pub ciphertext_sha256: String,
    pub plaintext_bytes: u64,
    pub chunks: u64,
}

/// Chunked XChaCha20-Poly1305 codec bound to one key and chunk size.
#[derive(Debug, Clone)]
pub struct ChunkedCipher {
    key: VideoKey,
    chunk_size: usize,
}

impl ChunkedCipher {
    pub fn new(key: VideoKey, chunk_size: usize) -> CodecResult<Self> {
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(CodecError::InvalidChunkSize(chunk_size));
        }
        Ok(Self { key, chunk_size })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Encrypt everything `reader` yields into framed chunks on `writer`.
    ///
    /// The writer is flushed but not synced; callers writing files should
    /// `sync_all` before trusting the result.
    pub async fn encrypt_stream<R, W>(&self, reader: &mut R, writer: &mut W) -> CodecResult<EncryptOutcome>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut plain_hash = IntegrityHasher::new();
        let mut cipher_hash = IntegrityHasher::new();
        let mut index = 0u64;

        let mut current = vec![0u8; self.chunk_size];
        let mut next = vec![0u8; self.chunk_size];
        let mut filled = read_full(reader, &mut current).await?;

        if filled > 0 {
            loop {
                // A short chunk means EOF; otherwise peek one chunk ahead to
                // learn whether this one is the last.
                let next_filled = if filled < self.chunk_size {
                    0
                } else {
                    read_full(reader, &mut next).await?
                };
                let is_final = next_filled == 0;

                let plaintext = &current[..filled];
                plain_hash.update(plaintext);

                let sealed = seal_chunk(&self.key, index, is_final, plaintext)?;
                let prefix = frame_prefix(sealed.len())?;
                writer.write_all(&prefix).await?;
                writer.write_all(&sealed).await?;
                cipher_hash.update(&prefix);
                cipher_hash.update(&sealed);

                index += 1;
                if is_final {
                    break;
                }

                std::mem::swap(&mut current, &mut next);
                filled = next_filled;
                tokio::task::yield_now().await;
            }
        }

        writer.flush().await?;

        let outcome = EncryptOutcome {
            plaintext_bytes: plain_hash.bytes(),
            ciphertext_bytes: cipher_hash.bytes(),
            plaintext_sha256: plain_hash.finalize_hex(),
            ciphertext_sha256: cipher_hash.finalize_hex(),
            chunks: index,
        };
        debug!(
            chunks = outcome.chunks,
            plaintext_bytes = outcome.plaintext_bytes,
            ciphertext_bytes = outcome.ciphertext_bytes,
            "encrypted stream"
        );
        Ok(outcome)
    }

    /// Decrypt a framed stream, writing plaintext to `writer`.
    ///
    /// Zero bytes at a prefix boundary ends the stream; any other short read
    /// is a framing fault. Nothing is written for a chunk that fails
    /// authentication.
    pub async fn decrypt_stream<R, W>(&self, reader: &mut R, writer: &mut W) -> CodecResult<DecryptOutcome>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut plain_hash = IntegrityHasher::new();
        let mut cipher_hash = IntegrityHasher::new();
        let mut index = 0u64;

        let mut pending = read_prefix(reader, index).await?;
        while let Some((prefix, frame_len)) = pending {
            let max_frame = MAX_CHUNK_SIZE + CHUNK_OVERHEAD;
            if frame_len > max_frame {
                return Err(CodecError::Framing(format!(
                    "chunk {index}: frame length {frame_len} exceeds maximum {max_frame}"
                )));
            }

            let mut sealed = vec![0u8; frame_len];
            let got = read_full(reader, &mut sealed).await?;
            if got != frame_len {
                return Err(CodecError::Framing(format!(
                    "chunk {index}: truncated frame ({got} of {frame_len} bytes)"
                )));
            }
            cipher_hash.update(&prefix);
            cipher_hash.update(&sealed);

            let next = read_prefix(reader, index + 1).await?;
            let plaintext = open_chunk(&self.key, index, next.is_none(), &sealed)?;
            writer.write_all(&plaintext).await?;
            plain_hash.update(&plaintext);

            index += 1;
            pending = next;
            tokio::task::yield_now().await;
        }

        writer.flush().await?;

        Ok(DecryptOutcome {
            plaintext_bytes: plain_hash.bytes(),
            plaintext_sha256: plain_hash.finalize_hex(),
            ciphertext_sha256: cipher_hash.finalize_hex(),
            chunks: index,
        })
    }

    /// Encrypt `reader` into a new file at `output` (fails if it exists).
    pub async fn encrypt_to_file<R>(&self, reader: &mut R, output: &Path) -> CodecResult<EncryptOutcome>
    where
        R: AsyncRead + Unpin,
    {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(output)
            .await?;
        let outcome = self.encrypt_stream(reader, &mut file).await?;
        file.sync_all().await?;
        Ok(outcome)
    }

    /// Decrypt the framed file at `input` into `output` (created or truncated).
    pub async fn decrypt_file(&self, input: &Path, output: &Path) -> CodecResult<DecryptOutcome> {
        let source = tokio::fs::File::open(input).await?;
        let mut reader = BufReader::with_capacity(256 * 1024, source);
        let mut file = tokio::fs::File::create(output).await?;
        let outcome = self.decrypt_stream(&mut reader, &mut file).await?;
        file.sync_all().await?;
        Ok(outcome)
    }
}

fn frame_prefix(len: usize) -> CodecResult<[u8; LENGTH_PREFIX_SIZE]> {
    let len = u32::try_from(len)
        .map_err(|_| CodecError::Framing(format!("sealed chunk of {len} bytes exceeds u32 framing")))?;
    Ok(len.to_le_bytes())
}

/// Read a length prefix. `None` on clean EOF at the boundary.
async fn read_prefix<R>(reader: &mut R, index: u64) -> CodecResult<Option<([u8; LENGTH_PREFIX_SIZE], usize)>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    match read_full(reader, &mut prefix).await? {
        0 => Ok(None),
        LENGTH_PREFIX_SIZE => Ok(Some((prefix, u32::from_le_bytes(prefix) as usize))),
        n => Err(CodecError::Framing(format!(
            "chunk {index}: truncated length prefix ({n} of {LENGTH_PREFIX_SIZE} bytes)"
        ))),
    }
}

/// Fill `buf` unless EOF comes first; returns the number of bytes read.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
