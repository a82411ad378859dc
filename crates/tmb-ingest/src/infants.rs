//! Infant records and cascade deletion

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use tmb_core::types::{Infant, InfantCreate, InfantUpdate};
use tmb_store::{CascadeReport, EntityStore};

use crate::error::{IngestError, IngestResult};
use crate::library::VideoLibrary;

/// What an infant deletion removed
#[derive(Debug)]
pub struct CascadeOutcome {
    pub report: CascadeReport,
    pub files_removed: usize,
    /// Stored names whose files could not be deleted
    pub orphaned_files: Vec<String>,
}

fn validate(full_name: &str, nhi_number: &str) -> IngestResult<()> {
    if full_name.trim().is_empty() {
        return Err(IngestError::InvalidInput("`full_name` must not be empty".into()));
    }
    if nhi_number.trim().is_empty() {
        return Err(IngestError::InvalidInput("`nhi_number` must not be empty".into()));
    }
    Ok(())
}

pub fn create(store: &dyn EntityStore, created_by: Uuid, request: InfantCreate) -> IngestResult<Infant> {
    validate(&request.full_name, &request.nhi_number)?;

    let infant = store.create_infant(Infant {
        infant_id: Uuid::new_v4(),
        full_name: request.full_name,
        birth_date: request.birth_date,
        due_date: request.due_date,
        nhi_number: request.nhi_number.trim().to_string(),
        created_by,
        created_at: Utc::now(),
    })?;
    info!(infant_id = %infant.infant_id, "infant created");
    Ok(infant)
}

pub fn get(store: &dyn EntityStore, infant_id: Uuid) -> IngestResult<Infant> {
    Ok(store.get_infant(infant_id)?)
}

pub fn get_by_nhi(store: &dyn EntityStore, nhi_number: &str) -> IngestResult<Infant> {
    store.find_infant_by_nhi(nhi_number)?.ok_or_else(|| {
        warn!(nhi = %nhi_number, "no infant with NHI number");
        IngestError::NotFound("An infant with the specified NHI number does not exist".into())
    })
}

pub fn list(store: &dyn EntityStore) -> IngestResult<Vec<Infant>> {
    Ok(store.list_infants()?)
}

pub fn update(store: &dyn EntityStore, infant_id: Uuid, changes: InfantUpdate) -> IngestResult<Infant> {
    let mut infant = store.get_infant(infant_id)?;
    if let Some(name) = changes.full_name {
        infant.full_name = name;
    }
    if let Some(date) = changes.birth_date {
        infant.birth_date = date;
    }
    if let Some(date) = changes.due_date {
        infant.due_date = date;
    }
    if let Some(nhi) = changes.nhi_number {
        infant.nhi_number = nhi.trim().to_string();
    }
    validate(&infant.full_name, &infant.nhi_number)?;
    Ok(store.update_infant(infant)?)
}

/// Delete an infant with all its consents and videos, then their files.
///
/// Records go first in one store transaction; a file that cannot be removed
/// afterwards is reported as orphaned rather than failing the deletion.
pub async fn delete_cascade(
    store: &dyn EntityStore,
    library: &VideoLibrary,
    infant_id: Uuid,
) -> IngestResult<CascadeOutcome> {
    let report = store.delete_infant_cascade(infant_id)?;

    let mut files_removed = 0;
    let mut orphaned_files = Vec::new();
    for video in &report.videos {
        match library.remove(&video.video_name).await {
            Ok(true) => files_removed += 1,
            Ok(false) => warn!(video = %video.video_name, "video file already missing"),
            Err(e) => {
                error!(video = %video.video_name, "orphaned video file: {e}");
                orphaned_files.push(video.video_name.clone());
            }
        }
    }

    info!(
        infant_id = %infant_id,
        consents = report.consents.len(),
        videos = report.videos.len(),
        files_removed,
        "infant deleted"
    );
    Ok(CascadeOutcome {
        report,
        files_removed,
        orphaned_files,
    })
}
