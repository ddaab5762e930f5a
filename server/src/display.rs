//! Headless display: remembers the last frame so the API can show it.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use spoolscale_firmware::DisplaySurface;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisplayFrame {
    #[default]
    Blank,
    Progress {
        step: u8,
        total: u8,
        title: String,
        status: String,
    },
    Weight {
        grams: i16,
    },
    Message {
        text: String,
    },
    Icon {
        name: String,
    },
}

#[derive(Clone, Default)]
pub struct HeadlessDisplay {
    frame: Arc<Mutex<DisplayFrame>>,
}

impl HeadlessDisplay {
    pub fn last_frame(&self) -> DisplayFrame {
        self.frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set(&self, frame: DisplayFrame) {
        tracing::debug!(?frame, "display");
        *self.frame.lock().unwrap_or_else(PoisonError::into_inner) = frame;
    }
}

impl DisplaySurface for HeadlessDisplay {
    fn show_progress(&mut self, step: u8, total: u8, title: &str, status: &str) {
        self.set(DisplayFrame::Progress {
            step,
            total,
            title: title.to_string(),
            status: status.to_string(),
        });
    }

    fn show_weight(&mut self, grams: i16) {
        self.set(DisplayFrame::Weight { grams });
    }

    fn show_message(&mut self, text: &str) {
        self.set(DisplayFrame::Message {
            text: text.to_string(),
        });
    }

    fn show_icon(&mut self, name: &str) {
        self.set(DisplayFrame::Icon {
            name: name.to_string(),
        });
    }
}
