use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use spoolscale_firmware::ReaderSnapshot;

use super::ApiError;
use crate::AppState;
use crate::db;
use crate::display::DisplayFrame;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(device_status))
        .route("/tare", post(tare_scale))
        .route("/calibrate", post(calibrate_scale))
        .route("/auto-tare", put(set_auto_tare))
        .route("/write-tag", post(write_tag))
}

#[derive(Debug, Serialize)]
pub struct DeviceStatus {
    reader: ReaderSnapshot,
    weight: i16,
    displayed_weight: i16,
    calibrated: bool,
    auto_tare: bool,
    display: DisplayFrame,
}

/// GET /api/device/status - Reader session, weight and display
async fn device_status(State(state): State<Arc<AppState>>) -> Json<DeviceStatus> {
    let engine = &state.engine;
    Json(DeviceStatus {
        reader: engine.snapshot(),
        weight: engine.current_weight(),
        displayed_weight: engine.displayed_weight(),
        calibrated: engine.is_calibrated(),
        auto_tare: engine.auto_tare_enabled(),
        display: state.display.last_frame(),
    })
}

/// POST /api/device/tare - Tare the scale
async fn tare_scale(State(state): State<Arc<AppState>>) -> StatusCode {
    state.engine.request_tare();
    StatusCode::ACCEPTED
}

#[derive(Debug, Serialize)]
pub struct CalibrationResult {
    factor: f32,
}

/// POST /api/device/calibrate - Run the interactive calibration
///
/// Blocks until the routine finishes (about 15 seconds).
async fn calibrate_scale(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CalibrationResult>, ApiError> {
    let factor = state.engine.calibrate().await?;
    Ok(Json(CalibrationResult { factor }))
}

#[derive(Debug, Deserialize)]
pub struct AutoTareRequest {
    pub enabled: bool,
}

/// PUT /api/device/auto-tare - Persist the auto-tare preference
async fn set_auto_tare(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AutoTareRequest>,
) -> Result<StatusCode, ApiError> {
    state.engine.set_auto_tare(request.enabled).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct WriteTagRequest {
    /// Write the tag for an inventory spool.
    pub spool_id: Option<String>,
    /// Write this JSON as-is (location or brand tags).
    pub json: Option<String>,
}

/// POST /api/device/write-tag - Queue a tag write
async fn write_tag(
    State(state): State<Arc<AppState>>,
    Json(request): Json<WriteTagRequest>,
) -> Result<StatusCode, ApiError> {
    let (is_spool_tag, payload) = match (request.spool_id, request.json) {
        (Some(id), _) => {
            let spool = db::fetch_spool(&state.db, &id)
                .await?
                .ok_or_else(|| ApiError::NotFound(format!("spool {id}")))?;
            (true, spool.tag_payload())
        }
        (None, Some(json)) => {
            serde_json::from_str::<serde_json::Value>(&json)
                .map_err(|e| ApiError::BadRequest(format!("json is not valid: {e}")))?;
            (false, json)
        }
        (None, None) => return Err(ApiError::BadRequest("spool_id or json required".into())),
    };

    state.engine.request_write(is_spool_tag, &payload).await?;
    Ok(StatusCode::ACCEPTED)
}
