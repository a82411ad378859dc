use thiserror::Error;

use tmb_crypto::CodecError;
use tmb_store::StoreError;

pub type IngestResult<T> = Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    /// A referenced record (infant by NHI or id, consent, video, user) is absent
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    NoConsent(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("Verification of the SHA256 checksum of the uploaded video failed ({computed})")]
    ChecksumMismatch { computed: String },

    #[error("{entity} with {field} {value:?} already exists")]
    UniqueConstraint {
        entity: &'static str,
        field: &'static str,
        value: String,
    },

    /// Deleting the record would leave videos without any consent
    #[error("{0}")]
    ConsentRequired(String),

    /// A stored video no longer matches the checksums recorded for it
    #[error("stored video failed integrity check: {0}")]
    Integrity(String),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    /// True for conflicts on caller-chosen keys (NHI number, access key).
    /// A clash on a generated video name is a server fault instead.
    pub fn is_natural_key_conflict(&self) -> bool {
        matches!(
            self,
            IngestError::UniqueConstraint { field, .. } if *field != "video_name"
        )
    }
}

impl From<StoreError> for IngestError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { entity, key } => {
                IngestError::NotFound(format!("{entity} {key} does not exist"))
            }
            StoreError::UniqueConstraint {
                entity,
                field,
                value,
            } => IngestError::UniqueConstraint {
                entity,
                field,
                value,
            },
            // A consent rule evaluated inside the store transaction
            StoreError::Rejected(rule_error) => match rule_error.downcast::<IngestError>() {
                Ok(e) => *e,
                Err(other) => IngestError::Store(StoreError::Rejected(other)),
            },
            other => IngestError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_carries_the_rule_error_through() {
        let rule_error: tmb_store::RuleError = Box::new(IngestError::ConsentRequired("last".into()));
        let e: IngestError = StoreError::Rejected(rule_error).into();
        assert!(matches!(e, IngestError::ConsentRequired(msg) if msg == "last"));

        let e: IngestError = StoreError::Rejected("opaque".into()).into();
        assert!(matches!(e, IngestError::Store(StoreError::Rejected(_))));
    }

    #[test]
    fn store_not_found_maps_to_not_found() {
        let e: IngestError = StoreError::NotFound {
            entity: "infant",
            key: "x".into(),
        }
        .into();
        assert!(matches!(e, IngestError::NotFound(_)));
    }

    #[test]
    fn video_name_clash_is_not_a_natural_key_conflict() {
        let nhi = IngestError::UniqueConstraint {
            entity: "infant",
            field: "nhi_number",
            value: "ABC1234".into(),
        };
        let name = IngestError::UniqueConstraint {
            entity: "video",
            field: "video_name",
            value: "x.mp4.enc".into(),
        };
        assert!(nhi.is_natural_key_conflict());
        assert!(!name.is_natural_key_conflict());
    }

    #[test]
    fn foreign_key_stays_a_store_error() {
        let e: IngestError = StoreError::ForeignKey {
            entity: "video",
            field: "infant_id",
            key: "k".into(),
        }
        .into();
        assert!(matches!(e, IngestError::Store(_)));
    }
}
