use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{TmbError, TmbResult};

// ── Checksums ────────────────────────────────────────────────────────────────

/// A SHA-256 digest as 64 lower-case hex characters.
///
/// Upper-case input is accepted and normalized, so stored checksums always
/// compare equal to digests produced by the codec.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Sha256Hex(String);

impl Sha256Hex {
    pub const LEN: usize = 64;

    pub fn parse(value: &str) -> TmbResult<Self> {
        if value.len() != Self::LEN {
            return Err(TmbError::Validation(format!(
                "SHA-256 checksum must be {} hex characters (got {})",
                Self::LEN,
                value.len()
            )));
        }
        if !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(TmbError::Validation(
                "SHA-256 checksum must only contain hex characters".into(),
            ));
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison against a computed hex digest.
    pub fn matches(&self, computed: &str) -> bool {
        self.0.eq_ignore_ascii_case(computed)
    }
}

impl fmt::Display for Sha256Hex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Sha256Hex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Sha256Hex::parse(&raw).map_err(serde::de::Error::custom)
    }
}

// ── Field presence ───────────────────────────────────────────────────────────

/// Tri-state field for update contracts on nullable columns.
///
/// A missing field deserializes to `Unset` (via `#[serde(default)]`), an
/// explicit `null` to `Null`, anything else to `Value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Patch<T> {
    Unset,
    Null,
    Value(T),
}

impl<T> Default for Patch<T> {
    fn default() -> Self {
        Patch::Unset
    }
}

impl<T> Patch<T> {
    pub fn is_unset(&self) -> bool {
        matches!(self, Patch::Unset)
    }

    /// Apply this patch to a nullable field.
    pub fn apply_to(self, target: &mut Option<T>) {
        match self {
            Patch::Unset => {}
            Patch::Null => *target = None,
            Patch::Value(v) => *target = Some(v),
        }
    }
}

impl<T> From<Option<T>> for Patch<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Patch::Value(v),
            None => Patch::Null,
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Patch<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<T>::deserialize(deserializer).map(Patch::from)
    }
}

// ── Users ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_id: Uuid,
    pub email: String,
    /// SHA-256 hex of the access key; the key itself is never stored
    pub access_key_hash: String,
    pub disabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserCreate {
    pub email: String,
    pub access_key: String,
    #[serde(default)]
    pub disabled: bool,
}

/// Non-nullable columns: `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub access_key: Option<String>,
    pub disabled: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserOut {
    pub user_id: Uuid,
    pub email: String,
    pub disabled: bool,
}

impl From<&User> for UserOut {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.user_id,
            email: user.email.clone(),
            disabled: user.disabled,
        }
    }
}

// ── Infants ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Infant {
    pub infant_id: Uuid,
    pub full_name: String,
    pub birth_date: NaiveDate,
    pub due_date: NaiveDate,
    /// National Health Index number; the natural key
    pub nhi_number: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InfantCreate {
    pub full_name: String,
    pub birth_date: NaiveDate,
    pub due_date: NaiveDate,
    pub nhi_number: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InfantUpdate {
    pub full_name: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub nhi_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfantOut {
    pub infant_id: Uuid,
    pub full_name: String,
    pub birth_date: NaiveDate,
    pub due_date: NaiveDate,
    pub nhi_number: String,
}

impl From<&Infant> for InfantOut {
    fn from(infant: &Infant) -> Self {
        Self {
            infant_id: infant.infant_id,
            full_name: infant.full_name.clone(),
            birth_date: infant.birth_date,
            due_date: infant.due_date,
            nhi_number: infant.nhi_number.clone(),
        }
    }
}

// ── Consents ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consent {
    pub consent_id: Uuid,
    pub infant_id: Uuid,
    pub consent_giver_name: Option<String>,
    pub consent_giver_email: Option<String>,
    pub collected_physically: bool,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// The consent fields subject to the "giver details or physical copy" rule.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ConsentProposal {
    #[serde(default)]
    pub consent_giver_name: Option<String>,
    #[serde(default)]
    pub consent_giver_email: Option<String>,
    #[serde(default)]
    pub collected_physically: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsentCreate {
    pub infant_id: Uuid,
    #[serde(flatten)]
    pub proposal: ConsentProposal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsentCreateViaNhi {
    pub nhi_number: String,
    #[serde(flatten)]
    pub proposal: ConsentProposal,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConsentUpdate {
    pub consent_giver_name: Patch<String>,
    pub consent_giver_email: Patch<String>,
    pub collected_physically: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsentOut {
    pub consent_id: Uuid,
    pub infant_id: Uuid,
    pub consent_giver_name: Option<String>,
    pub consent_giver_email: Option<String>,
    pub collected_physically: bool,
    pub created_at: DateTime<Utc>,
}

impl Consent {
    pub fn proposal(&self) -> ConsentProposal {
        ConsentProposal {
            consent_giver_name: self.consent_giver_name.clone(),
            consent_giver_email: self.consent_giver_email.clone(),
            collected_physically: self.collected_physically,
        }
    }
}

impl From<&Consent> for ConsentOut {
    fn from(consent: &Consent) -> Self {
        Self {
            consent_id: consent.consent_id,
            infant_id: consent.infant_id,
            consent_giver_name: consent.consent_giver_name.clone(),
            consent_giver_email: consent.consent_giver_email.clone(),
            collected_physically: consent.collected_physically,
            created_at: consent.created_at,
        }
    }
}

// ── Videos ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    pub video_id: Uuid,
    pub infant_id: Uuid,
    /// Declared SHA-256 of the plaintext upload
    pub sha256sum: Sha256Hex,
    /// Stored file name under the video library (unique)
    pub video_name: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    /// Plaintext size; `None` while the upload is pending
    pub size_bytes: Option<u64>,
    /// SHA-256 of the framed ciphertext file; `None` while pending
    pub sha256sum_enc: Option<String>,
}

impl Video {
    pub fn is_finalized(&self) -> bool {
        self.size_bytes.is_some() && self.sha256sum_enc.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoOut {
    pub video_id: Uuid,
    pub infant_id: Uuid,
    pub sha256sum: String,
    pub video_name: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub size_bytes: Option<u64>,
}

impl From<&Video> for VideoOut {
    fn from(video: &Video) -> Self {
        Self {
            video_id: video.video_id,
            infant_id: video.infant_id,
            sha256sum: video.sha256sum.to_string(),
            video_name: video.video_name.clone(),
            created_by: video.created_by,
            created_at: video.created_at,
            size_bytes: video.size_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX64: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

    #[test]
    fn checksum_accepts_64_hex() {
        let c = Sha256Hex::parse(HEX64).unwrap();
        assert_eq!(c.as_str(), HEX64);
    }

    #[test]
    fn checksum_normalizes_case() {
        let c = Sha256Hex::parse(&HEX64.to_ascii_uppercase()).unwrap();
        assert_eq!(c.as_str(), HEX64);
        assert!(c.matches(&HEX64.to_ascii_uppercase()));
    }

    #[test]
    fn checksum_rejects_wrong_length() {
        assert!(Sha256Hex::parse(&HEX64[..32]).is_err());
        assert!(Sha256Hex::parse(&format!("{HEX64}0")).is_err());
        assert!(Sha256Hex::parse("").is_err());
    }

    #[test]
    fn checksum_rejects_non_hex() {
        let bad = format!("{}zz", &HEX64[..62]);
        assert!(Sha256Hex::parse(&bad).is_err());
    }

    #[test]
    fn checksum_deserialize_validates() {
        let ok: Result<Sha256Hex, _> = serde_json::from_str(&format!("\"{HEX64}\""));
        assert!(ok.is_ok());
        let bad: Result<Sha256Hex, _> = serde_json::from_str("\"abc\"");
        assert!(bad.is_err());
    }

    #[test]
    fn patch_distinguishes_missing_null_and_value() {
        let missing: ConsentUpdate = serde_json::from_str("{}").unwrap();
        assert!(missing.consent_giver_name.is_unset());

        let null: ConsentUpdate =
            serde_json::from_str(r#"{"consent_giver_name": null}"#).unwrap();
        assert_eq!(null.consent_giver_name, Patch::Null);

        let value: ConsentUpdate =
            serde_json::from_str(r#"{"consent_giver_name": "Jo"}"#).unwrap();
        assert_eq!(value.consent_giver_name, Patch::Value("Jo".to_string()));
    }

    #[test]
    fn patch_apply_to() {
        let mut field = Some("old".to_string());
        Patch::Unset.apply_to(&mut field);
        assert_eq!(field.as_deref(), Some("old"));

        Patch::Value("new".to_string()).apply_to(&mut field);
        assert_eq!(field.as_deref(), Some("new"));

        Patch::Null.apply_to(&mut field);
        assert_eq!(field, None);
    }

    #[test]
    fn consent_create_via_nhi_flattens_proposal() {
        let c: ConsentCreateViaNhi = serde_json::from_str(
            r#"{"nhi_number": "ABC1234", "collected_physically": true}"#,
        )
        .unwrap();
        assert_eq!(c.nhi_number, "ABC1234");
        assert!(c.proposal.collected_physically);
        assert!(c.proposal.consent_giver_name.is_none());
    }
}
