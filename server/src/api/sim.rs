//! Controls for the simulated reader and load cell.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{post, put},
};
use serde::Deserialize;
use spoolscale_firmware::nfc::TagFamily;
use spoolscale_firmware::nfc::sim::SimTag;

use super::ApiError;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tag", post(place_tag).delete(remove_tag))
        .route("/load", put(set_load))
}

#[derive(Debug, Deserialize)]
pub struct PlaceTagRequest {
    /// Defaults to the configured family.
    pub family: Option<TagFamily>,
    /// Hex bytes, e.g. "04:5a:21:6c:3b:70:80".
    pub uid: Option<String>,
    /// Message already on the tag; blank when absent.
    pub json: Option<String>,
}

fn parse_uid(text: &str) -> Result<Vec<u8>, ApiError> {
    text.split(':')
        .map(|byte| u8::from_str_radix(byte, 16))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| ApiError::BadRequest(format!("uid {text:?} is not colon-separated hex")))
}

/// POST /api/sim/tag - Put a tag on the reader
async fn place_tag(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PlaceTagRequest>,
) -> Result<StatusCode, ApiError> {
    let family = request.family.unwrap_or(state.config.sim_tag_family);
    let mut tag = SimTag::new(family);
    if let Some(uid) = &request.uid {
        tag = tag.with_uid(&parse_uid(uid)?);
    }
    if let Some(json) = &request.json {
        tag = tag.with_json(json)?;
    }
    tracing::info!(?family, "simulated tag placed");
    state.sim.tag.place(tag);
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/sim/tag - Take the tag away
async fn remove_tag(State(state): State<Arc<AppState>>) -> StatusCode {
    state.sim.tag.remove();
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
pub struct LoadRequest {
    pub grams: f32,
}

/// PUT /api/sim/load - Set the weight on the platform
async fn set_load(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoadRequest>,
) -> StatusCode {
    state.sim.load.set_load(request.grams);
    StatusCode::NO_CONTENT
}
