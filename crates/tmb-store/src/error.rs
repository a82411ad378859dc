use std::path::PathBuf;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("unique constraint failed: {entity}.{field} = {value}")]
    UniqueConstraint {
        entity: &'static str,
        field: &'static str,
        value: String,
    },

    #[error("foreign key constraint failed: {entity}.{field} -> {key}")]
    ForeignKey {
        entity: &'static str,
        field: &'static str,
        key: String,
    },

    #[error("loading store {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("persisting store {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("locking store {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A rule supplied by the caller refused the mutation
    #[error("rejected: {0}")]
    Rejected(#[source] crate::RuleError),

    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, key: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            key: key.to_string(),
        }
    }
}
