mod events;
mod ui;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::task::JoinHandle;

use crate::AppState;

pub use events::UiEvent;
use events::WeightReading;
pub use ui::ui_ws;

const WEIGHT_POLL: Duration = Duration::from_millis(250);

/// Build the WebSocket router
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/ui", axum::routing::get(ui_ws))
}

pub fn weight_reading(state: &AppState) -> WeightReading {
    WeightReading {
        grams: state.engine.current_weight(),
        displayed: state.engine.displayed_weight(),
        calibrated: state.engine.is_calibrated(),
    }
}

/// Turn reader session changes and weight changes into UI events.
pub fn spawn_broadcaster(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = state.engine.subscribe();
        let mut previous = reader.borrow_and_update().clone();
        let mut ticker = tokio::time::interval(WEIGHT_POLL);
        let mut last_weight = None;
        loop {
            tokio::select! {
                changed = reader.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let next = reader.borrow_and_update().clone();
                    for event in events::reader_events(&previous, &next) {
                        let _ = state.ui_broadcast.send(event);
                    }
                    previous = next;
                }
                _ = ticker.tick() => {
                    let weight = weight_reading(&state);
                    if last_weight != Some(weight) {
                        last_weight = Some(weight);
                        let _ = state.ui_broadcast.send(UiEvent::Weight(weight));
                    }
                }
            }
        }
        tracing::debug!("reader session closed, broadcaster stopped");
    })
}
