//! Consent records, validated and guarded by [`ConsentGuard`]

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use tmb_core::types::{Consent, ConsentCreate, ConsentCreateViaNhi, ConsentProposal, ConsentUpdate};
use tmb_store::EntityStore;

use crate::error::IngestResult;
use crate::guard::ConsentGuard;
use crate::infants;

fn insert(
    store: &dyn EntityStore,
    created_by: Uuid,
    infant_id: Uuid,
    proposal: ConsentProposal,
) -> IngestResult<Consent> {
    ConsentGuard::assert_consent_valid(&proposal)?;

    let consent = store.create_consent(Consent {
        consent_id: Uuid::new_v4(),
        infant_id,
        consent_giver_name: proposal.consent_giver_name,
        consent_giver_email: proposal.consent_giver_email,
        collected_physically: proposal.collected_physically,
        created_by,
        created_at: Utc::now(),
    })?;
    info!(consent_id = %consent.consent_id, infant_id = %infant_id, "consent recorded");
    Ok(consent)
}

pub fn create(store: &dyn EntityStore, created_by: Uuid, request: ConsentCreate) -> IngestResult<Consent> {
    // Surface a missing infant as NotFound rather than a foreign-key fault
    let infant = infants::get(store, request.infant_id)?;
    insert(store, created_by, infant.infant_id, request.proposal)
}

pub fn create_via_nhi(
    store: &dyn EntityStore,
    created_by: Uuid,
    request: ConsentCreateViaNhi,
) -> IngestResult<Consent> {
    let infant = infants::get_by_nhi(store, &request.nhi_number)?;
    insert(store, created_by, infant.infant_id, request.proposal)
}

pub fn get(store: &dyn EntityStore, consent_id: Uuid) -> IngestResult<Consent> {
    Ok(store.get_consent(consent_id)?)
}

pub fn list(store: &dyn EntityStore) -> IngestResult<Vec<Consent>> {
    Ok(store.list_consents()?)
}

pub fn list_for_infant(store: &dyn EntityStore, infant_id: Uuid) -> IngestResult<Vec<Consent>> {
    Ok(store.consents_for_infant(infant_id)?)
}

/// Apply a partial update; the merged record must still be a valid consent.
pub fn update(store: &dyn EntityStore, consent_id: Uuid, changes: ConsentUpdate) -> IngestResult<Consent> {
    let mut consent = store.get_consent(consent_id)?;
    changes.consent_giver_name.apply_to(&mut consent.consent_giver_name);
    changes.consent_giver_email.apply_to(&mut consent.consent_giver_email);
    if let Some(physically) = changes.collected_physically {
        consent.collected_physically = physically;
    }

    ConsentGuard::assert_consent_valid(&consent.proposal())?;
    Ok(store.update_consent(consent)?)
}

/// Delete a consent unless it is the last one covering existing videos.
/// The check and the delete happen in one store transaction.
pub fn delete(store: &dyn EntityStore, consent_id: Uuid) -> IngestResult<Consent> {
    let consent = store.delete_consent_guarded(consent_id, &ConsentGuard::delete_rule)?;
    info!(consent_id = %consent_id, infant_id = %consent.infant_id, "consent deleted");
    Ok(consent)
}
