//! `/v1` HTTP API
//!
//! Routes:
//!   POST /v1/infants/   JSON InfantCreate        → InfantOut
//!   POST /v1/consents/  JSON ConsentCreateViaNhi → ConsentOut
//!   POST /v1/videos/    multipart (nhi_number, checksum_sha256, video) → VideoOut
//!
//! The upload body is streamed straight into the intake pipeline, so the
//! text parts have to arrive before the `video` part.

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    routing::{get, post},
    Json, Router,
};
use futures::TryStreamExt;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio_util::io::StreamReader;
use tracing::debug;

use tmb_core::types::{ConsentCreateViaNhi, ConsentOut, InfantCreate, InfantOut, VideoOut};
use tmb_core::Sha256Hex;
use tmb_ingest::{consents, infants, UploadRequest, VideoIngest};

use crate::auth::CurrentUser;
use crate::error::ApiError;
use crate::metrics::{self, IngestMetrics};

#[derive(Clone)]
pub struct AppState {
    pub ingest: Arc<VideoIngest>,
    pub metrics: IngestMetrics,
    pub registry: Arc<Registry>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/infants/", post(create_infant))
        .route("/v1/consents/", post(create_consent))
        .route(
            "/v1/videos/",
            post(upload_video).layer(DefaultBodyLimit::disable()),
        )
        .route("/metrics", get(metrics::metrics_handler))
        .route("/healthz", get(metrics::healthz_handler))
        .route("/readyz", get(metrics::readyz_handler))
        .with_state(state)
}

async fn create_infant(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<InfantCreate>,
) -> Result<Json<InfantOut>, ApiError> {
    let infant = state
        .ingest
        .with_store(move |store| infants::create(store, user.user_id, request))
        .await?;
    Ok(Json(InfantOut::from(&infant)))
}

async fn create_consent(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<ConsentCreateViaNhi>,
) -> Result<Json<ConsentOut>, ApiError> {
    let consent = state
        .ingest
        .with_store(move |store| consents::create_via_nhi(store, user.user_id, request))
        .await?;
    Ok(Json(ConsentOut::from(&consent)))
}

async fn upload_video(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    mut multipart: Multipart,
) -> Result<Json<VideoOut>, ApiError> {
    let mut nhi_number: Option<String> = None;
    let mut checksum: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "nhi_number" | "checksum_sha256" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("reading `{name}`: {e}")))?;
                if name == "nhi_number" {
                    nhi_number = Some(value);
                } else {
                    checksum = Some(value);
                }
            }
            "video" => {
                let nhi_number = nhi_number
                    .take()
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| {
                        ApiError::BadRequest("`nhi_number` must be sent before `video`".into())
                    })?;
                let checksum = checksum.take().ok_or_else(|| {
                    ApiError::BadRequest("`checksum_sha256` must be sent before `video`".into())
                })?;
                let declared_sha256 = Sha256Hex::parse(checksum.trim())
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;

                let request = UploadRequest {
                    original_file_name: field.file_name().unwrap_or_default().to_string(),
                    declared_sha256,
                    nhi_number,
                    created_by: user.user_id,
                };
                debug!(
                    file = %request.original_file_name,
                    content_type = ?field.content_type(),
                    "receiving video"
                );

                let reader = StreamReader::new(field.map_err(std::io::Error::other));
                tokio::pin!(reader);
                let result = state.ingest.upload(&mut reader, request).await;
                state.metrics.record_upload(&result);

                let video = result?;
                return Ok(Json(VideoOut::from(&video)));
            }
            other => debug!(field = other, "ignoring unknown multipart field"),
        }
    }

    Err(ApiError::BadRequest("missing `video` file part".into()))
}
