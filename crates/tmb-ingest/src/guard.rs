//! Consent rules
//!
//! A video may only exist for an infant that has at least one consent, and
//! a consent is only meaningful if it names its giver or was collected on
//! paper. These checks take counts and proposals rather than a store handle
//! so every caller (pipeline, services, daemon) shares one definition. The
//! count-based checks are also handed to the store as rules so they run in
//! the same transaction as the write they protect.

use tmb_core::types::ConsentProposal;
use tmb_store::RuleError;
use tracing::warn;

use crate::error::{IngestError, IngestResult};

pub struct ConsentGuard;

impl ConsentGuard {
    pub fn assert_consent_exists(consent_count: usize) -> IngestResult<()> {
        if consent_count == 0 {
            warn!("no consent exists for infant, refusing video");
            return Err(IngestError::NoConsent(
                "No consent exists for this infant".into(),
            ));
        }
        Ok(())
    }

    /// Either `collected_physically`, or both giver name and email present.
    /// Whitespace-only values count as missing.
    pub fn assert_consent_valid(proposal: &ConsentProposal) -> IngestResult<()> {
        if proposal.collected_physically {
            return Ok(());
        }

        for (field, value) in [
            ("consent_giver_email", &proposal.consent_giver_email),
            ("consent_giver_name", &proposal.consent_giver_name),
        ] {
            if is_blank(value) {
                let msg =
                    format!("Must set `{field}` when not specifying `collected_physically`");
                warn!(field, "invalid consent proposal");
                return Err(IngestError::InvalidInput(msg));
            }
        }
        Ok(())
    }

    /// Blocks removing the last consent of an infant that still owns videos.
    pub fn assert_deletable(consent_count: usize, video_count: usize) -> IngestResult<()> {
        if consent_count == 1 && video_count > 0 {
            return Err(IngestError::ConsentRequired(format!(
                "Cannot delete the only consent of an infant with {video_count} video(s)"
            )));
        }
        Ok(())
    }
}

/// [`ConsentGuard`] checks in the shape of a [`tmb_store::ConsentRule`], for
/// evaluation inside the store transaction that performs the write.
impl ConsentGuard {
    pub fn video_rule(consent_count: usize, _video_count: usize) -> Result<(), RuleError> {
        Self::assert_consent_exists(consent_count).map_err(RuleError::from)
    }

    pub fn delete_rule(consent_count: usize, video_count: usize) -> Result<(), RuleError> {
        Self::assert_deletable(consent_count, video_count).map_err(RuleError::from)
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposal(name: Option<&str>, email: Option<&str>, physically: bool) -> ConsentProposal {
        ConsentProposal {
            consent_giver_name: name.map(String::from),
            consent_giver_email: email.map(String::from),
            collected_physically: physically,
        }
    }

    #[test]
    fn test_consent_exists() {
        assert!(matches!(
            ConsentGuard::assert_consent_exists(0),
            Err(IngestError::NoConsent(_))
        ));
        ConsentGuard::assert_consent_exists(1).unwrap();
        ConsentGuard::assert_consent_exists(5).unwrap();
    }

    #[test]
    fn test_valid_proposals() {
        ConsentGuard::assert_consent_valid(&proposal(Some("Jo"), Some("jo@x.nz"), false))
            .unwrap();
        ConsentGuard::assert_consent_valid(&proposal(None, None, true)).unwrap();
        ConsentGuard::assert_consent_valid(&proposal(Some("Jo"), None, true)).unwrap();
    }

    #[test]
    fn test_missing_name_rejected() {
        let err = ConsentGuard::assert_consent_valid(&proposal(None, Some("jo@x.nz"), false))
            .unwrap_err();
        assert!(matches!(err, IngestError::InvalidInput(_)));
        assert!(err.to_string().contains("consent_giver_name"));
    }

    #[test]
    fn test_missing_email_rejected() {
        let err =
            ConsentGuard::assert_consent_valid(&proposal(Some("Jo"), None, false)).unwrap_err();
        assert!(err.to_string().contains("consent_giver_email"));
    }

    #[test]
    fn test_all_unset_rejected() {
        assert!(ConsentGuard::assert_consent_valid(&ConsentProposal::default()).is_err());
    }

    #[test]
    fn test_whitespace_counts_as_missing() {
        assert!(
            ConsentGuard::assert_consent_valid(&proposal(Some("  "), Some("jo@x.nz"), false))
                .is_err()
        );
        assert!(
            ConsentGuard::assert_consent_valid(&proposal(Some("Jo"), Some(""), false)).is_err()
        );
    }

    #[test]
    fn test_deletable() {
        assert!(matches!(
            ConsentGuard::assert_deletable(1, 1),
            Err(IngestError::ConsentRequired(_))
        ));
        ConsentGuard::assert_deletable(1, 0).unwrap();
        ConsentGuard::assert_deletable(2, 3).unwrap();
    }
}
