mod api;
mod config;
mod db;
mod display;
mod websocket;

use std::sync::Arc;

use axum::Router;
use spoolscale_firmware::nfc::sim::{SimFrontend, SimTagHandle};
use spoolscale_firmware::scale::sim::{SIM_COUNTS_PER_GRAM, SimLoadCell, SimScaleHandle};
use spoolscale_firmware::{Collaborators, Engine};
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::{SqliteSettings, SqliteSpoolDatabase};
use crate::display::HeadlessDisplay;
use crate::websocket::UiEvent;

pub type DeviceEngine = Engine<SimFrontend, SimLoadCell>;

/// Handles onto the simulated hardware.
pub struct SimHardware {
    pub tag: SimTagHandle,
    pub load: SimScaleHandle,
}

/// Shared application state
pub struct AppState {
    pub db: SqlitePool,
    pub config: Config,
    pub engine: Arc<DeviceEngine>,
    pub sim: SimHardware,
    pub display: HeadlessDisplay,
    /// Broadcast channel for UI updates
    pub ui_broadcast: broadcast::Sender<UiEvent>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "spoolscale_server=debug,spoolscale_firmware=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let db = db::connect(&config.database_url).await?;
    db::migrate(&db).await?;

    let (frontend, tag) = SimFrontend::new();
    let (load_cell, load) = SimLoadCell::new(SIM_COUNTS_PER_GRAM);
    let display = HeadlessDisplay::default();
    let engine = Arc::new(Engine::boot(
        config.engine.clone(),
        frontend,
        load_cell,
        Collaborators {
            database: Arc::new(SqliteSpoolDatabase::new(db.clone())),
            settings: Arc::new(SqliteSettings::new(db.clone())),
            display: display.clone(),
        },
    ));

    // A starved task means the device is wedged; restart like the hardware watchdog would
    engine.watchdog().spawn_monitor(|task| {
        tracing::error!(task, "watchdog expired, aborting");
        std::process::abort();
    });

    if let Err(e) = engine.start_tag_engine().await {
        tracing::error!(error = %e, "tag engine unavailable, continuing without it");
    }
    tokio::spawn({
        let engine = Arc::clone(&engine);
        async move {
            if let Err(e) = engine.start_scale().await {
                tracing::error!(error = %e, "scale failed to start");
            }
        }
    });

    let (ui_broadcast, _) = broadcast::channel(100);

    let state = Arc::new(AppState {
        db,
        config: config.clone(),
        engine,
        sim: SimHardware { tag, load },
        display,
        ui_broadcast,
    });

    websocket::spawn_broadcaster(Arc::clone(&state));

    let app = Router::new()
        .nest("/api", api::router())
        .nest("/ws", websocket::router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    tracing::info!("Spool scale server listening on {}", config.bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
