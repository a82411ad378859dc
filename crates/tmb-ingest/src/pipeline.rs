//! Video intake: create pending record → stream-encrypt → verify → finalize
//!
//! ```text
//! start ─► infant_resolved ─► consent_verified ─► record_pending ─► streaming ─┬─► finalized
//!                                                                               └─► rolled_back
//! ```
//!
//! Nothing is written before consent is verified. From `record_pending` on,
//! a [`PendingUpload`] guard owns the record id and file path; unless it is
//! finalized, dropping it deletes both. That covers checksum mismatches,
//! I/O and codec faults, store faults, and an upload future that is dropped
//! mid-stream.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tmb_core::types::Video;
use tmb_core::Sha256Hex;
use tmb_crypto::{ChunkedCipher, DecryptOutcome};
use tmb_store::EntityStore;

use crate::error::{IngestError, IngestResult};
use crate::guard::ConsentGuard;
use crate::library::VideoLibrary;

/// One video upload as received from a caller.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Client-side file name; only its extension is kept
    pub original_file_name: String,
    /// Checksum the caller claims for the plaintext
    pub declared_sha256: Sha256Hex,
    pub nhi_number: String,
    pub created_by: Uuid,
}

/// Result of decrypting a stored video back to plaintext
#[derive(Debug, Clone)]
pub struct ExportOutcome {
    pub video: Video,
    pub output: PathBuf,
    pub plaintext_bytes: u64,
    pub chunks: u64,
}

pub struct VideoIngest {
    store: Arc<dyn EntityStore>,
    library: VideoLibrary,
    cipher: ChunkedCipher,
    naming: fn(&str) -> String,
}

impl VideoIngest {
    pub fn new(store: Arc<dyn EntityStore>, library: VideoLibrary, cipher: ChunkedCipher) -> Self {
        Self {
            store,
            library,
            cipher,
            naming: VideoLibrary::stored_name,
        }
    }

    /// Replace how stored file names are derived from the client's file
    /// name (default [`VideoLibrary::stored_name`]).
    pub fn with_naming(mut self, naming: fn(&str) -> String) -> Self {
        self.naming = naming;
        self
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn library(&self) -> &VideoLibrary {
        &self.library
    }

    /// Run `f` against the store on the blocking pool.
    pub async fn with_store<T, F>(&self, f: F) -> IngestResult<T>
    where
        F: FnOnce(&dyn EntityStore) -> IngestResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(store_task_failed)?
    }

    /// Run the intake transaction for one upload body.
    ///
    /// On success the returned record is finalized: `size_bytes` is the
    /// plaintext length and `sha256sum_enc` the digest of the framed file.
    /// On any error neither a record nor a file remains.
    pub async fn upload<R>(&self, reader: &mut R, request: UploadRequest) -> IngestResult<Video>
    where
        R: AsyncRead + Unpin,
    {
        let nhi_number = request.nhi_number.clone();
        let infant = self
            .with_store(move |store| Ok(store.find_infant_by_nhi(&nhi_number)?))
            .await?
            .ok_or_else(|| {
                warn!(nhi = %request.nhi_number, "upload for unknown infant");
                IngestError::NotFound(
                    "An infant with the specified NHI number does not exist".into(),
                )
            })?;
        debug!(state = "infant_resolved", infant_id = %infant.infant_id);

        let video_name = (self.naming)(&request.original_file_name);
        let path = self.library.path_for(&video_name)?;
        let video_id = Uuid::new_v4();

        // Armed before the insert is issued, so a cancellation at any later
        // point removes whatever has been created
        let mut pending = PendingUpload::new(Arc::clone(&self.store), video_id, path.clone());
        let record = self
            .insert_pending(Video {
                video_id,
                infant_id: infant.infant_id,
                sha256sum: request.declared_sha256.clone(),
                video_name: video_name.clone(),
                created_by: request.created_by,
                created_at: Utc::now(),
                size_bytes: None,
                sha256sum_enc: None,
            })
            .await
            .inspect_err(|_| pending.disarm())?;
        debug!(state = "consent_verified", infant_id = %record.infant_id);
        debug!(state = "record_pending", video_id = %record.video_id, video = %video_name);

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        pending.file_created = true;
        debug!(state = "streaming", path = %path.display());

        let outcome = self.cipher.encrypt_stream(reader, &mut file).await?;
        file.sync_all().await?;
        drop(file);

        if !request.declared_sha256.matches(&outcome.plaintext_sha256) {
            warn!(
                video = %video_name,
                declared = %request.declared_sha256,
                computed = %outcome.plaintext_sha256,
                "checksums do not match"
            );
            pending.abort().await;
            return Err(IngestError::ChecksumMismatch {
                computed: outcome.plaintext_sha256,
            });
        }

        let video = pending
            .finalize(outcome.plaintext_bytes, outcome.ciphertext_sha256)
            .await?;
        info!(
            state = "finalized",
            video_id = %video.video_id,
            video = %video.video_name,
            plaintext_bytes = outcome.plaintext_bytes,
            ciphertext_bytes = outcome.ciphertext_bytes,
            chunks = outcome.chunks,
            "video stored"
        );
        Ok(video)
    }

    /// Insert the pending record, checking for consent in the same store
    /// transaction. If the upload is dropped before the result is received,
    /// the blocking task removes the record it inserted.
    async fn insert_pending(&self, video: Video) -> IngestResult<Video> {
        let store = Arc::clone(&self.store);
        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio::task::spawn_blocking(move || {
            let video_id = video.video_id;
            let result = store
                .create_video_guarded(video, &ConsentGuard::video_rule)
                .map_err(IngestError::from);
            if let Err(Ok(_)) = tx.send(result) {
                if let Err(e) = store.delete_video(video_id) {
                    error!(%video_id, "removing pending record of a cancelled upload: {e}");
                }
            }
        });
        rx.await
            .map_err(|_| store_task_failed("pending record insert ended without a result"))?
    }

    /// Decrypt a finalized video to `output` and check it against both the
    /// recorded ciphertext digest and the declared plaintext digest.
    ///
    /// The output file is removed if decryption or either check fails.
    pub async fn export(&self, video_id: Uuid, output: &Path) -> IngestResult<ExportOutcome> {
        let video = self
            .with_store(move |store| Ok(store.get_video(video_id)?))
            .await?;
        let Some(expected_enc) = video.sha256sum_enc.clone() else {
            return Err(IngestError::InvalidInput(format!(
                "video {video_id} has not finished uploading"
            )));
        };
        let input = self.library.path_for(&video.video_name)?;

        let outcome = match self.cipher.decrypt_file(&input, output).await {
            Ok(outcome) => outcome,
            Err(e) => {
                discard_output(output).await;
                return Err(e.into());
            }
        };

        if let Err(e) = verify_export(&video, &expected_enc, &outcome) {
            discard_output(output).await;
            return Err(e);
        }

        info!(
            video_id = %video.video_id,
            output = %output.display(),
            bytes = outcome.plaintext_bytes,
            "video exported"
        );
        Ok(ExportOutcome {
            video,
            output: output.to_path_buf(),
            plaintext_bytes: outcome.plaintext_bytes,
            chunks: outcome.chunks,
        })
    }
}

fn store_task_failed(e: impl std::fmt::Display) -> IngestError {
    IngestError::Io(std::io::Error::other(format!("store task failed: {e}")))
}

fn verify_export(video: &Video, expected_enc: &str, outcome: &DecryptOutcome) -> IngestResult<()> {
    if !expected_enc.eq_ignore_ascii_case(&outcome.ciphertext_sha256) {
        error!(
            video = %video.video_name,
            recorded = %expected_enc,
            computed = %outcome.ciphertext_sha256,
            "stored ciphertext digest mismatch"
        );
        return Err(IngestError::Integrity(format!(
            "ciphertext digest {} does not match recorded {expected_enc}",
            outcome.ciphertext_sha256
        )));
    }
    if !video.sha256sum.matches(&outcome.plaintext_sha256) {
        error!(
            video = %video.video_name,
            declared = %video.sha256sum,
            computed = %outcome.plaintext_sha256,
            "decrypted plaintext digest mismatch"
        );
        return Err(IngestError::Integrity(format!(
            "plaintext digest {} does not match declared {}",
            outcome.plaintext_sha256, video.sha256sum
        )));
    }
    Ok(())
}

async fn discard_output(output: &Path) {
    if let Err(e) = tokio::fs::remove_file(output).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(output = %output.display(), "could not remove partial output: {e}");
        }
    }
}

/// Rollback guard for an in-flight upload.
///
/// Armed from the moment the pending record exists. `finalize` disarms it;
/// anything else (early return, `?`, cancellation) rolls back on drop.
struct PendingUpload {
    store: Arc<dyn EntityStore>,
    video_id: Uuid,
    path: PathBuf,
    /// Only a file this upload created may be deleted on rollback
    file_created: bool,
    armed: bool,
}

impl PendingUpload {
    fn new(store: Arc<dyn EntityStore>, video_id: Uuid, path: PathBuf) -> Self {
        Self {
            store,
            video_id,
            path,
            file_created: false,
            armed: true,
        }
    }

    /// The pending insert failed: nothing exists to roll back.
    fn disarm(&mut self) {
        self.armed = false;
    }

    async fn finalize(mut self, size_bytes: u64, sha256sum_enc: String) -> IngestResult<Video> {
        let store = Arc::clone(&self.store);
        let video_id = self.video_id;
        let video = tokio::task::spawn_blocking(move || {
            store.finalize_video(video_id, size_bytes, sha256sum_enc)
        })
        .await
        .map_err(store_task_failed)??;
        self.armed = false;
        Ok(video)
    }

    async fn abort(mut self) {
        let rolled_back = tokio::task::spawn_blocking(move || self.rollback()).await;
        if let Err(e) = rolled_back {
            error!("rollback task failed: {e}");
        }
    }

    fn rollback(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;

        let file_result = if self.file_created {
            match std::fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e),
            }
        } else {
            Ok(())
        };
        let record_result = self.store.delete_video(self.video_id);

        match (file_result, record_result) {
            (Ok(()), Ok(_)) => {
                debug!(state = "rolled_back", video_id = %self.video_id);
            }
            (file_result, record_result) => {
                error!(
                    video_id = %self.video_id,
                    path = %self.path.display(),
                    file_error = ?file_result.err(),
                    record_error = ?record_result.err(),
                    "rollback incomplete: orphaned upload artifacts remain"
                );
            }
        }
    }
}

impl Drop for PendingUpload {
    fn drop(&mut self) {
        self.rollback();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tmb_core::types::{Consent, Infant, User};
    use tmb_crypto::{sha256_hex, VideoKey, KEY_SIZE};
    use tmb_store::JsonStore;

    async fn fixture(tmp: &tempfile::TempDir) -> (VideoIngest, User) {
        let store: Arc<dyn EntityStore> = Arc::new(JsonStore::in_memory());
        let user = store
            .create_user(User {
                user_id: Uuid::new_v4(),
                email: "u@example.org".into(),
                access_key_hash: "0".repeat(64),
                disabled: false,
                created_at: Utc::now(),
            })
            .unwrap();
        let library = VideoLibrary::open(tmp.path().join("videos")).await.unwrap();
        let cipher = ChunkedCipher::new(VideoKey::from_bytes([3u8; KEY_SIZE]), 64).unwrap();
        (VideoIngest::new(store, library, cipher), user)
    }

    fn add_infant(ingest: &VideoIngest, user: &User, nhi: &str, with_consent: bool) -> Infant {
        let infant = ingest
            .store()
            .create_infant(Infant {
                infant_id: Uuid::new_v4(),
                full_name: "Test Infant".into(),
                birth_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                due_date: NaiveDate::from_ymd_opt(2024, 3, 20).unwrap(),
                nhi_number: nhi.into(),
                created_by: user.user_id,
                created_at: Utc::now(),
            })
            .unwrap();
        if with_consent {
            ingest
                .store()
                .create_consent(Consent {
                    consent_id: Uuid::new_v4(),
                    infant_id: infant.infant_id,
                    consent_giver_name: None,
                    consent_giver_email: None,
                    collected_physically: true,
                    created_by: user.user_id,
                    created_at: Utc::now(),
                })
                .unwrap();
        }
        infant
    }

    fn request(data: &[u8], nhi: &str, user: &User) -> UploadRequest {
        UploadRequest {
            original_file_name: "clip.mp4".into(),
            declared_sha256: Sha256Hex::parse(&sha256_hex(data)).unwrap(),
            nhi_number: nhi.into(),
            created_by: user.user_id,
        }
    }

    fn library_entries(ingest: &VideoIngest) -> usize {
        std::fs::read_dir(ingest.library().root()).unwrap().count()
    }

    #[tokio::test]
    async fn test_upload_finalizes_record() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (ingest, user) = fixture(&tmp).await;
        add_infant(&ingest, &user, "ABC1234", true);

        let data = vec![7u8; 150];
        let video = ingest
            .upload(&mut data.as_slice(), request(&data, "ABC1234", &user))
            .await
            .unwrap();

        assert!(video.is_finalized());
        assert_eq!(video.size_bytes, Some(150));
        assert!(video.video_name.ends_with(".mp4.enc"));

        let stored = ingest.library().path_for(&video.video_name).unwrap();
        let on_disk = std::fs::read(&stored).unwrap();
        assert_eq!(video.sha256sum_enc.as_deref(), Some(sha256_hex(&on_disk).as_str()));
    }

    #[tokio::test]
    async fn test_unknown_nhi_has_no_side_effects() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (ingest, user) = fixture(&tmp).await;

        let err = ingest
            .upload(&mut &b"x"[..], request(b"x", "NOPE000", &user))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::NotFound(_)));
        assert_eq!(library_entries(&ingest), 0);
        assert!(ingest.store().list_videos().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_uppercase_declared_checksum_accepted() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (ingest, user) = fixture(&tmp).await;
        add_infant(&ingest, &user, "ABC1234", true);

        let data = b"case does not matter";
        let mut req = request(data, "ABC1234", &user);
        req.declared_sha256 = Sha256Hex::parse(&sha256_hex(data).to_ascii_uppercase()).unwrap();

        ingest.upload(&mut &data[..], req).await.unwrap();
    }

    #[tokio::test]
    async fn test_guard_rolls_back_on_drop() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (ingest, user) = fixture(&tmp).await;
        let infant = add_infant(&ingest, &user, "ABC1234", true);

        let name = "manual.enc";
        let path = ingest.library().path_for(name).unwrap();
        let record = ingest
            .store()
            .create_video(Video {
                video_id: Uuid::new_v4(),
                infant_id: infant.infant_id,
                sha256sum: Sha256Hex::parse(&"e".repeat(64)).unwrap(),
                video_name: name.into(),
                created_by: user.user_id,
                created_at: Utc::now(),
                size_bytes: None,
                sha256sum_enc: None,
            })
            .unwrap();
        std::fs::write(&path, b"partial").unwrap();

        {
            let mut guard = PendingUpload::new(Arc::clone(ingest.store()), record.video_id, path.clone());
            guard.file_created = true;
        }

        assert!(!path.exists());
        assert!(ingest.store().get_video(record.video_id).is_err());
    }

    #[tokio::test]
    async fn test_guard_leaves_foreign_file_alone() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (ingest, _) = fixture(&tmp).await;

        let path = ingest.library().path_for("other.enc").unwrap();
        std::fs::write(&path, b"someone else's upload").unwrap();

        drop(PendingUpload::new(Arc::clone(ingest.store()), Uuid::new_v4(), path.clone()));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_export_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (ingest, user) = fixture(&tmp).await;
        add_infant(&ingest, &user, "ABC1234", true);

        let data: Vec<u8> = (0u32..1000).map(|i| (i % 256) as u8).collect();
        let video = ingest
            .upload(&mut data.as_slice(), request(&data, "ABC1234", &user))
            .await
            .unwrap();

        let out = tmp.path().join("plain.mp4");
        let exported = ingest.export(video.video_id, &out).await.unwrap();
        assert_eq!(exported.plaintext_bytes, 1000);
        assert_eq!(std::fs::read(&out).unwrap(), data);
    }

    #[tokio::test]
    async fn test_export_detects_swapped_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (ingest, user) = fixture(&tmp).await;
        add_infant(&ingest, &user, "ABC1234", true);

        let a = vec![1u8; 100];
        let b = vec![2u8; 100];
        let va = ingest
            .upload(&mut a.as_slice(), request(&a, "ABC1234", &user))
            .await
            .unwrap();
        let vb = ingest
            .upload(&mut b.as_slice(), request(&b, "ABC1234", &user))
            .await
            .unwrap();

        // Same key, valid frames, wrong file for the record
        let pa = ingest.library().path_for(&va.video_name).unwrap();
        let pb = ingest.library().path_for(&vb.video_name).unwrap();
        std::fs::copy(&pb, &pa).unwrap();

        let out = tmp.path().join("out.bin");
        let err = ingest.export(va.video_id, &out).await.unwrap_err();
        assert!(matches!(err, IngestError::Integrity(_)), "got {err:?}");
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_export_detects_tampering() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (ingest, user) = fixture(&tmp).await;
        add_infant(&ingest, &user, "ABC1234", true);

        let data = vec![9u8; 300];
        let video = ingest
            .upload(&mut data.as_slice(), request(&data, "ABC1234", &user))
            .await
            .unwrap();

        let path = ingest.library().path_for(&video.video_name).unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x80;
        std::fs::write(&path, &bytes).unwrap();

        let out = tmp.path().join("out.bin");
        let err = ingest.export(video.video_id, &out).await.unwrap_err();
        assert!(matches!(err, IngestError::Codec(ref c) if c.is_integrity_fault()));
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_generated_name_collision_is_a_server_fault() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (ingest, user) = fixture(&tmp).await;
        let ingest = ingest.with_naming(|_| "fixed.mp4.enc".to_string());
        add_infant(&ingest, &user, "ABC1234", true);

        let first = vec![4u8; 120];
        let kept = ingest
            .upload(&mut first.as_slice(), request(&first, "ABC1234", &user))
            .await
            .unwrap();
        let kept_bytes = std::fs::read(ingest.library().path_for(&kept.video_name).unwrap()).unwrap();

        let second = vec![5u8; 80];
        let err = ingest
            .upload(&mut second.as_slice(), request(&second, "ABC1234", &user))
            .await
            .unwrap_err();
        assert!(
            matches!(err, IngestError::UniqueConstraint { field: "video_name", .. }),
            "got {err:?}"
        );
        assert!(!err.is_natural_key_conflict());

        // The existing upload is untouched and nothing else was written
        assert_eq!(library_entries(&ingest), 1);
        assert_eq!(ingest.store().list_videos().unwrap(), vec![kept.clone()]);
        let path = ingest.library().path_for(&kept.video_name).unwrap();
        assert_eq!(std::fs::read(path).unwrap(), kept_bytes);
    }
}
