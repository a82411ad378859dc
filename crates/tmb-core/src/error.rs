use std::path::PathBuf;
use thiserror::Error;

pub type TmbResult<T> = Result<T, TmbError>;

#[derive(Debug, Error)]
pub enum TmbError {
    #[error("config error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
