//! tmb-store: record storage for the TinyMotion backend
//!
//! Ownership is modelled as foreign keys by value (`infant_id` on consents
//! and videos, `created_by` on everything) rather than as an object graph.
//! Every mutation is atomic: it either applies completely and is persisted,
//! or leaves the store untouched.
//!
//! Constraints enforced here:
//!   - unique: `User.access_key_hash`, `Infant.nhi_number`, `Video.video_name`
//!   - foreign key: `created_by` → user, `infant_id` → infant
//!
//! Business rules (consent requirements) live in `tmb-ingest`, not here.
//! They are passed in as a [`ConsentRule`] where a rule must be evaluated in
//! the same transaction as the write it protects.

pub mod error;
pub mod json;

pub use error::{StoreError, StoreResult};
pub use json::JsonStore;

use tmb_core::types::{Consent, Infant, User, Video};
use uuid::Uuid;

/// Error raised by a caller-supplied rule; carried back in
/// [`StoreError::Rejected`].
pub type RuleError = Box<dyn std::error::Error + Send + Sync>;

/// Evaluated under the write lock with the owning infant's current
/// `(consent_count, video_count)`.
pub type ConsentRule<'a> = &'a dyn Fn(usize, usize) -> Result<(), RuleError>;

/// Everything removed by [`EntityStore::delete_infant_cascade`].
#[derive(Debug, Clone)]
pub struct CascadeReport {
    pub infant: Infant,
    pub consents: Vec<Consent>,
    pub videos: Vec<Video>,
}

/// Transactional CRUD over the four entity tables.
///
/// Plain `delete_*` methods have delete-if-exists semantics and report
/// whether a record was removed, so rollback and cleanup sweeps can be
/// retried. Guarded and cascading deletes report `NotFound` instead.
pub trait EntityStore: Send + Sync {
    fn create_user(&self, user: User) -> StoreResult<User>;
    fn get_user(&self, user_id: Uuid) -> StoreResult<User>;
    fn find_user_by_access_key_hash(&self, hash: &str) -> StoreResult<Option<User>>;
    fn list_users(&self) -> StoreResult<Vec<User>>;
    fn update_user(&self, user: User) -> StoreResult<User>;
    fn delete_user(&self, user_id: Uuid) -> StoreResult<bool>;

    fn create_infant(&self, infant: Infant) -> StoreResult<Infant>;
    fn get_infant(&self, infant_id: Uuid) -> StoreResult<Infant>;
    fn find_infant_by_nhi(&self, nhi_number: &str) -> StoreResult<Option<Infant>>;
    fn list_infants(&self) -> StoreResult<Vec<Infant>>;
    fn update_infant(&self, infant: Infant) -> StoreResult<Infant>;
    /// Delete an infant together with all of its consents and videos.
    fn delete_infant_cascade(&self, infant_id: Uuid) -> StoreResult<CascadeReport>;

    fn create_consent(&self, consent: Consent) -> StoreResult<Consent>;
    fn get_consent(&self, consent_id: Uuid) -> StoreResult<Consent>;
    fn list_consents(&self) -> StoreResult<Vec<Consent>>;
    fn consents_for_infant(&self, infant_id: Uuid) -> StoreResult<Vec<Consent>>;
    fn update_consent(&self, consent: Consent) -> StoreResult<Consent>;
    /// Delete a consent if `rule` accepts the infant's counts, taken before
    /// the delete and in the same transaction.
    fn delete_consent_guarded(&self, consent_id: Uuid, rule: ConsentRule<'_>) -> StoreResult<Consent>;

    fn create_video(&self, video: Video) -> StoreResult<Video>;
    /// Insert a video if `rule` accepts the infant's counts, taken before
    /// the insert and in the same transaction.
    fn create_video_guarded(&self, video: Video, rule: ConsentRule<'_>) -> StoreResult<Video>;
    fn get_video(&self, video_id: Uuid) -> StoreResult<Video>;
    fn find_video_by_name(&self, video_name: &str) -> StoreResult<Option<Video>>;
    fn list_videos(&self) -> StoreResult<Vec<Video>>;
    fn videos_for_infant(&self, infant_id: Uuid) -> StoreResult<Vec<Video>>;
    /// Populate the size and ciphertext checksum of a pending video.
    fn finalize_video(&self, video_id: Uuid, size_bytes: u64, sha256sum_enc: String) -> StoreResult<Video>;
    fn delete_video(&self, video_id: Uuid) -> StoreResult<bool>;
}
