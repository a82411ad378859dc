//! Video record queries and deletion (record + encrypted file)

use tracing::{info, warn};
use uuid::Uuid;

use tmb_core::types::Video;
use tmb_store::EntityStore;

use crate::error::IngestResult;
use crate::library::VideoLibrary;

pub fn get(store: &dyn EntityStore, video_id: Uuid) -> IngestResult<Video> {
    Ok(store.get_video(video_id)?)
}

pub fn list(store: &dyn EntityStore) -> IngestResult<Vec<Video>> {
    Ok(store.list_videos()?)
}

pub fn list_for_infant(store: &dyn EntityStore, infant_id: Uuid) -> IngestResult<Vec<Video>> {
    Ok(store.videos_for_infant(infant_id)?)
}

/// Remove the record, then its file. Returns the deleted record and whether
/// a file was found on disk.
pub async fn delete(
    store: &dyn EntityStore,
    library: &VideoLibrary,
    video_id: Uuid,
) -> IngestResult<(Video, bool)> {
    let video = store.get_video(video_id)?;
    // Validate the name before touching the record
    library.path_for(&video.video_name)?;

    store.delete_video(video_id)?;
    let file_removed = library.remove(&video.video_name).await?;
    if !file_removed {
        warn!(video = %video.video_name, "video file was already missing");
    }
    info!(video_id = %video_id, video = %video.video_name, "video deleted");
    Ok((video, file_removed))
}
