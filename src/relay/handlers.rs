//! HTTP API handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::codec::encoder::BYTES_PER_SAMPLE;
use crate::codec::{armor, unarmor};
use crate::protocol::{AudioResponse, DownloadQuery, EncodedFrame, UploadRequest};
use crate::relay::server::AppState;
use crate::relay::store::RelayStats;

/// Relay status
#[derive(Debug, serde::Serialize)]
pub struct RelayStatus {
    pub status: &'static str,
    pub uptime_seconds: u64,
    #[serde(flatten)]
    pub stats: RelayStats,
}

/// Accept one frame from a capturing device
pub async fn upload_audio(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
    Json(req): Json<UploadRequest>,
) -> (StatusCode, Json<AudioResponse>) {
    let bytes = match unarmor(&req.audio_data) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!("Rejected upload from {}: {}", device_id, e);
            return (StatusCode::BAD_REQUEST, Json(AudioResponse::error(e.to_string())));
        }
    };

    if bytes.is_empty() || bytes.len() % BYTES_PER_SAMPLE != 0 {
        tracing::debug!("Rejected {}-byte upload from {}", bytes.len(), device_id);
        return (
            StatusCode::BAD_REQUEST,
            Json(AudioResponse::error(format!(
                "audio_data must be a non-empty run of f32 samples, got {} bytes",
                bytes.len()
            ))),
        );
    }

    let frame = EncodedFrame {
        bytes: bytes.into(),
        sequence: req.sequence,
        epoch: req.epoch,
    };
    let sequence = state.store.upload(&device_id, req.audio_type, frame);
    tracing::trace!("Stored frame {} for {}/{}", sequence, device_id, req.audio_type);

    let mut response = AudioResponse::ok();
    response.sequence = Some(sequence);
    (StatusCode::OK, Json(response))
}

/// Hand out the oldest waiting frame, or an empty success
pub async fn download_audio(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> Json<AudioResponse> {
    match state.store.download(&device_id, query.audio_type) {
        Some(frame) => Json(AudioResponse::with_audio(armor(&frame.bytes), &frame)),
        None => Json(AudioResponse::ok()),
    }
}

/// Get relay status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<RelayStatus> {
    Json(RelayStatus {
        status: "running",
        uptime_seconds: state.started.elapsed().as_secs(),
        stats: state.store.stats(),
    })
}
