//! On-disk video library: one flat directory of `<uuid><ext>.enc` files.

use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use crate::error::{IngestError, IngestResult};

/// Suffix appended to every stored (encrypted) video.
pub const ENCRYPTED_SUFFIX: &str = ".enc";

#[derive(Debug, Clone)]
pub struct VideoLibrary {
    root: PathBuf,
}

impl VideoLibrary {
    /// Open the library, creating the directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> IngestResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fresh stored name: random UUID, the original extension (if any), `.enc`.
    pub fn stored_name(original_file_name: &str) -> String {
        let ext = Path::new(original_file_name)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty())
            .map(|e| format!(".{e}"))
            .unwrap_or_default();
        format!("{}{ext}{ENCRYPTED_SUFFIX}", Uuid::new_v4())
    }

    /// Resolve a stored name to its path. Names with path components are
    /// rejected so a record can never point outside the library.
    pub fn path_for(&self, video_name: &str) -> IngestResult<PathBuf> {
        let is_plain = !video_name.is_empty()
            && video_name != "."
            && video_name != ".."
            && !video_name.contains(['/', '\\']);
        if !is_plain {
            return Err(IngestError::InvalidInput(format!(
                "invalid stored video name: {video_name:?}"
            )));
        }
        Ok(self.root.join(video_name))
    }

    /// Delete-if-exists. Returns whether a file was removed.
    pub async fn remove(&self, video_name: &str) -> IngestResult<bool> {
        let path = self.path_for(video_name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "removed video file");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Probe that the directory accepts new files.
    pub async fn check_writable(&self) -> IngestResult<()> {
        let probe = self.root.join(format!(".probe-{}", Uuid::new_v4()));
        tokio::fs::write(&probe, b"").await?;
        tokio::fs::remove_file(&probe).await?;
        Ok(())
    }
}
