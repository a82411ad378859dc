//! Prometheus /metrics + health check endpoints
//!
//! Endpoints:
//!   GET /metrics  : Prometheus text format
//!   GET /healthz  : liveness probe (always 200 if process is running)
//!   GET /readyz   : readiness probe (200 if the video library is writable)

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use prometheus_client::{
    encoding::text::encode,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

use tmb_core::types::Video;
use tmb_ingest::{IngestError, IngestResult};

use crate::api::AppState;

type Labels = Vec<(String, String)>;

#[derive(Clone)]
pub struct IngestMetrics {
    uploads: Family<Labels, Counter>,
    bytes_ingested: Counter,
}

impl IngestMetrics {
    pub fn new(registry: &mut Registry) -> Self {
        let uploads = Family::default();
        let bytes_ingested = Counter::default();

        registry.register(
            "tmb_video_uploads",
            "Video uploads by outcome",
            uploads.clone(),
        );
        registry.register(
            "tmb_video_bytes_ingested",
            "Plaintext bytes of successfully stored videos",
            bytes_ingested.clone(),
        );

        Self {
            uploads,
            bytes_ingested,
        }
    }

    pub fn record_upload(&self, result: &IngestResult<Video>) {
        let outcome = match result {
            Ok(_) => "stored",
            Err(IngestError::ChecksumMismatch { .. }) => "checksum_mismatch",
            Err(IngestError::NoConsent(_)) => "no_consent",
            Err(IngestError::NotFound(_)) => "not_found",
            Err(IngestError::InvalidInput(_)) => "invalid",
            Err(_) => "error",
        };
        self.uploads
            .get_or_create(&vec![("outcome".to_string(), outcome.to_string())])
            .inc();

        if let Ok(video) = result {
            self.bytes_ingested.inc_by(video.size_bytes.unwrap_or(0));
        }
    }
}

pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut body = String::new();
    match encode(&mut body, &state.registry) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            tracing::error!("metrics encode failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.to_string(),
            )
        }
    }
}

/// Liveness probe: returns 200 if the process is running.
pub async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe: returns 200 if new videos can be written, 503 otherwise.
pub async fn readyz_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.ingest.library().check_writable().await {
        Ok(()) => (StatusCode::OK, "ready"),
        Err(e) => {
            tracing::warn!("readiness: video library not writable: {e}");
            (StatusCode::SERVICE_UNAVAILABLE, "video library not writable")
        }
    }
}
