use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{TmbError, TmbResult};

/// Default plaintext chunk size for video encryption (10 MiB)
pub const DEFAULT_CHUNK_SIZE_BYTES: usize = 10 * 1024 * 1024;

/// Largest accepted chunk size. Frames carry a u32 length prefix, so the
/// ciphertext of one chunk must stay far below 4 GiB.
pub const MAX_CHUNK_SIZE_BYTES: usize = 256 * 1024 * 1024;

/// Top-level configuration (loaded from config.toml)
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TmbConfig {
    pub daemon: DaemonConfig,
    pub store: StoreConfig,
    pub videos: VideoConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// HTTP listen address (default: 127.0.0.1:8000)
    pub listen: String,
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON record database path
    pub db_path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Directory holding encrypted video files
    pub library_path: PathBuf,
    /// Plaintext bytes per encrypted chunk
    pub chunk_size_bytes: usize,
    /// Base64-encoded 256-bit video encryption secret
    #[serde(skip_serializing, deserialize_with = "deserialize_secret")]
    pub secret_key: Option<SecretString>,
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8000".into(),
            log_level: "info".into(),
            log_format: "text".into(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./tinymotion.json"),
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            library_path: PathBuf::from("./videos"),
            chunk_size_bytes: DEFAULT_CHUNK_SIZE_BYTES,
            secret_key: None,
        }
    }
}

impl TmbConfig {
    /// Load configuration from `path`, falling back to defaults when the file
    /// does not exist, then apply environment overrides and validate.
    pub fn load(path: &Path) -> TmbResult<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|source| TmbError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str(&content)
                .map_err(|e| TmbError::Config(format!("parsing {}: {e}", path.display())))?
        } else {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            TmbConfig::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `TINYMOTION_*` overrides. The lookup is injected so tests do not
    /// have to mutate the process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup("TINYMOTION_VIDEO_SECRET_KEY") {
            self.videos.secret_key = Some(SecretString::from(secret));
        }
        if let Some(path) = lookup("TINYMOTION_VIDEO_LIBRARY_PATH") {
            self.videos.library_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("TINYMOTION_DATABASE_PATH") {
            self.store.db_path = PathBuf::from(path);
        }
    }

    pub fn validate(&self) -> TmbResult<()> {
        let chunk = self.videos.chunk_size_bytes;
        if chunk == 0 || chunk > MAX_CHUNK_SIZE_BYTES {
            return Err(TmbError::Config(format!(
                "videos.chunk_size_bytes must be between 1 and {MAX_CHUNK_SIZE_BYTES} (got {chunk})"
            )));
        }
        if !matches!(self.daemon.log_format.as_str(), "json" | "text") {
            return Err(TmbError::Config(format!(
                "daemon.log_format must be \"json\" or \"text\" (got {:?})",
                self.daemon.log_format
            )));
        }
        Ok(())
    }
}
