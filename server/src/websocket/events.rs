//! Messages exchanged with UI clients.

use serde::{Deserialize, Serialize};
use spoolscale_firmware::{ReaderSnapshot, ReaderState};

use crate::db::Spool;
use crate::display::DisplayFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WeightReading {
    pub grams: i16,
    pub displayed: i16,
    pub calibrated: bool,
}

/// Server to client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    InitialState {
        reader: ReaderSnapshot,
        weight: WeightReading,
        display: DisplayFrame,
    },
    Weight(WeightReading),
    /// Tag placed, removed or the reader moved to a new state.
    Tag {
        state: ReaderState,
        spool_id: Option<String>,
        uid: Option<String>,
    },
    WriteResult {
        ok: bool,
        spool_id: Option<String>,
        error: Option<String>,
    },
    SpoolCreated {
        spool: Spool,
    },
    /// A client command could not be applied.
    Error {
        message: String,
    },
}

impl UiEvent {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "ui event not serializable");
            String::from(r#"{"type":"error","message":"serialization failed"}"#)
        })
    }
}

/// Client to server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiCommand {
    Tare,
    SetAutoTare { enabled: bool },
}

fn non_empty(id: &str) -> Option<String> {
    (!id.is_empty()).then(|| id.to_string())
}

/// Events implied by a reader session change.
pub fn reader_events(prev: &ReaderSnapshot, next: &ReaderSnapshot) -> Vec<UiEvent> {
    let mut events = Vec::new();
    if prev.state != next.state || prev.active_spool_id != next.active_spool_id || prev.uid != next.uid {
        events.push(UiEvent::Tag {
            state: next.state,
            spool_id: non_empty(&next.active_spool_id),
            uid: next.uid.clone(),
        });
    }

    let finished_write = prev.state != next.state
        && matches!(next.state, ReaderState::WriteSuccess | ReaderState::WriteError);
    if finished_write {
        let ok = next.state == ReaderState::WriteSuccess;
        events.push(UiEvent::WriteResult {
            ok,
            spool_id: non_empty(&next.active_spool_id),
            error: if ok { None } else { next.last_error.clone() },
        });
    }
    events
}
