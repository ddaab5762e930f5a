//! Resource sharing between the scan, weight, write and main tasks.
//!
//! - tag semantics: the session's `write_in_progress` flag (see
//!   [`crate::nfc::reader`]); the bus lock is per transfer only
//! - display: [`DisplayLock`], bounded wait, skip on timeout
//! - calibration: [`TaskGate`], fully suspends scan and weight tasks
//! - liveness: [`Watchdog`]

mod display;
mod gate;
mod watchdog;

pub use display::{DisplayGuard, DisplayLock};
pub use gate::{GatePermit, TaskGate, TaskSuspension};
pub use watchdog::{Watchdog, WatchdogFeed, WatchdogPause};

use crate::collaborators::DisplaySurface;
use crate::config::EngineConfig;

#[derive(Clone)]
pub struct Coordinator {
    pub gate: TaskGate,
    pub display: DisplayLock,
    pub watchdog: Watchdog,
}

impl Coordinator {
    pub fn new(config: &EngineConfig, display: impl DisplaySurface + 'static) -> Self {
        Self {
            gate: TaskGate::new(),
            display: DisplayLock::new(display, config.display_lock_wait()),
            watchdog: Watchdog::new(config.watchdog_timeout()),
        }
    }

    /// Suspend the scan and weight tasks until the returned pause is dropped.
    pub async fn pause_for_calibration(&self) -> CalibrationPause {
        let watchdog = self.watchdog.pause();
        let tasks = self.gate.suspend().await;
        CalibrationPause {
            _tasks: tasks,
            _watchdog: watchdog,
        }
    }
}

/// Scan and weight tasks are parked while this is alive.
pub struct CalibrationPause {
    _tasks: TaskSuspension,
    _watchdog: WatchdogPause,
}
