//! HTTP API handlers

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::audio::ToneSource;
use crate::error::{Error, TrackError};
use crate::network::{PeerId, PeerInfo};
use crate::protocol::{MixerAction, TrackId, Transport};
use crate::session::{SessionStatus, TrackView};
use crate::tracks::PlaybackStatus;
use crate::ui::server::AppState;

/// Samples per buffer handed to the capture ring by the tone source
const TONE_BUFFER_LEN: usize = 441;

/// API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

type ApiResult<T> = (StatusCode, Json<ApiResponse<T>>);

/// HTTP status for a failed session call
pub fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::Track(TrackError::NotFound(_)) | Error::Track(TrackError::NoAudio(_)) => {
            StatusCode::NOT_FOUND
        }
        Error::Track(_) => StatusCode::CONFLICT,
        Error::Protocol(_) | Error::Config(_) => StatusCode::BAD_REQUEST,
        Error::Network(_) => StatusCode::BAD_GATEWAY,
        Error::SessionClosed => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond<T>(result: crate::Result<T>, success: StatusCode) -> ApiResult<T> {
    match result {
        Ok(data) => (success, Json(ApiResponse::ok(data))),
        Err(e) => {
            tracing::debug!("API call failed: {}", e);
            (status_for(&e), Json(ApiResponse::error(e.to_string())))
        }
    }
}

/// System status
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    #[serde(flatten)]
    pub session: SessionStatus,
    pub uptime_seconds: u64,
}

/// Get system status
pub async fn get_status(State(state): State<Arc<AppState>>) -> ApiResult<SystemStatus> {
    let result = state.session.status().await.map(|session| SystemStatus {
        session,
        uptime_seconds: state.started.elapsed().as_secs(),
    });
    respond(result, StatusCode::OK)
}

/// Get all tracks
pub async fn get_tracks(State(state): State<Arc<AppState>>) -> ApiResult<Vec<TrackView>> {
    respond(state.session.tracks().await, StatusCode::OK)
}

/// Create a new track
pub async fn create_track(State(state): State<Arc<AppState>>) -> ApiResult<TrackId> {
    respond(state.session.add_track().await, StatusCode::CREATED)
}

/// Delete a track
pub async fn delete_track(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TrackId>,
) -> ApiResult<()> {
    respond(state.session.remove_track(id).await, StatusCode::OK)
}

/// Transport request body, e.g. `{"action": "seekTo", "positionSeconds": 3.5}`
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum TransportRequest {
    Play,
    Pause,
    Stop,
    PlayPause,
    SeekTo {
        #[serde(rename = "positionSeconds")]
        position_seconds: f64,
    },
}

impl From<TransportRequest> for Transport {
    fn from(req: TransportRequest) -> Self {
        match req {
            TransportRequest::Play => Transport::Play,
            TransportRequest::Pause => Transport::Pause,
            TransportRequest::Stop => Transport::Stop,
            TransportRequest::PlayPause => Transport::PlayPause,
            TransportRequest::SeekTo { position_seconds } => Transport::SeekTo { position_seconds },
        }
    }
}

pub async fn transport(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TrackId>,
    Json(req): Json<TransportRequest>,
) -> ApiResult<PlaybackStatus> {
    respond(state.session.transport(id, req.into()).await, StatusCode::OK)
}

/// Recording request body; every field is optional
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecordRequest {
    pub frequency: f32,
    pub amplitude: f32,
    /// Stop on its own after this long
    pub seconds: Option<f64>,
}

impl Default for RecordRequest {
    fn default() -> Self {
        Self {
            frequency: 440.0,
            amplitude: 0.5,
            seconds: None,
        }
    }
}

/// Start recording a track from the built-in tone source
pub async fn start_record(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TrackId>,
    req: Option<Json<RecordRequest>>,
) -> ApiResult<String> {
    let req = req.map(|Json(r)| r).unwrap_or_default();
    let mut source = ToneSource::new(req.frequency, state.sample_rate, TONE_BUFFER_LEN)
        .amplitude(req.amplitude);
    if let Some(seconds) = req.seconds.filter(|s| s.is_finite() && *s > 0.0) {
        source = source.limit((seconds * state.sample_rate as f64) as u64);
    }

    let result = state
        .session
        .start_recording(id, Box::new(source))
        .await
        .map(|session| session.to_string());
    respond(result, StatusCode::OK)
}

pub async fn stop_record(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TrackId>,
) -> ApiResult<()> {
    respond(state.session.stop_recording(id).await, StatusCode::OK)
}

/// Download a track as WAV
pub async fn export_track(State(state): State<Arc<AppState>>, Path(id): Path<TrackId>) -> Response {
    match state.session.export_track(id).await {
        Ok(wav) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "audio/wav".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"track-{id}.wav\""),
                ),
            ],
            wav,
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(track_id = id, "Export failed: {}", e);
            (status_for(&e), Json(ApiResponse::<()>::error(e.to_string()))).into_response()
        }
    }
}

pub async fn get_peers(State(state): State<Arc<AppState>>) -> ApiResult<Vec<PeerInfo>> {
    respond(state.session.peers().await, StatusCode::OK)
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectRequest {
    /// `host:port` of the remote peer
    pub address: String,
}

/// Dial a peer
pub async fn connect_peer(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConnectRequest>,
) -> ApiResult<PeerId> {
    let Some(transport) = &state.transport else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::error("No peer transport configured")),
        );
    };
    let result = transport.connect(&req.address).await.map_err(Error::from);
    respond(result, StatusCode::OK)
}

pub async fn get_history(State(state): State<Arc<AppState>>) -> ApiResult<Vec<MixerAction>> {
    respond(state.session.history().await, StatusCode::OK)
}
