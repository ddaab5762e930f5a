use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};

use super::ApiError;
use crate::{
    AppState,
    db::{self, Spool, SpoolFilter, SpoolInput},
    websocket::UiEvent,
};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_spools).post(create_spool))
        .route("/{id}", get(get_spool))
}

/// GET /api/spools - Inventory, optionally filtered
async fn list_spools(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<SpoolFilter>,
) -> Result<Json<Vec<Spool>>, ApiError> {
    Ok(Json(db::list_spools(&state.db, &filter).await?))
}

/// GET /api/spools/{id} - Get a single spool
async fn get_spool(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Spool>, ApiError> {
    db::fetch_spool(&state.db, &id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("spool {id}")))
}

/// POST /api/spools - Register a spool so its tag can be written
async fn create_spool(
    State(state): State<Arc<AppState>>,
    Json(input): Json<SpoolInput>,
) -> Result<(StatusCode, Json<Spool>), ApiError> {
    let spool = db::insert_spool(&state.db, &input, None, None).await?;
    tracing::info!(id = %spool.id, "spool created");

    let _ = state.ui_broadcast.send(UiEvent::SpoolCreated {
        spool: spool.clone(),
    });

    Ok((StatusCode::CREATED, Json(spool)))
}
