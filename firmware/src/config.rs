//! Timing and behaviour knobs for the engine.
//!
//! Attempt ceilings that guard the bus live as constants next to the code
//! that uses them ([`crate::nfc::tag_io`]); this struct only carries the
//! values a deployment may want to tune.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pause between scans when no tag is being held.
    pub scan_interval_ms: u64,
    /// Pause between scans while a successfully read tag stays on the reader.
    pub read_success_hold_ms: u64,
    /// Poll interval of the scan task while a write owns the tag.
    pub write_pause_poll_ms: u64,
    /// Settle time after a tag is detected, before the first page read.
    pub tag_settle_ms: u64,
    /// Presence probes the write task makes before giving up.
    pub write_wait_attempts: u32,
    /// Pages the fast path reads from the start of the user area.
    pub fast_path_pages: u8,
    /// Weight task sample interval.
    pub sample_interval_ms: u64,
    /// Settle time before and after a tare.
    pub tare_settle_ms: u64,
    /// Reference weight placed on the scale during calibration, in grams.
    pub reference_weight_g: f32,
    /// Calibration factor used until the scale has been calibrated.
    pub default_calibration: f32,
    /// A touch sensor replaces auto-tare by default.
    pub touch_sensor_connected: bool,
    /// Length of each operator step during calibration.
    pub calibration_step_ms: u64,
    /// Watchdog starvation threshold.
    pub watchdog_timeout_ms: u64,
    /// How long a drawer waits for the display before skipping.
    pub display_lock_wait_ms: u64,
    /// Main loop tick.
    pub main_tick_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: 500,
            read_success_hold_ms: 3000,
            write_pause_poll_ms: 100,
            tag_settle_ms: 200,
            write_wait_attempts: 30,
            fast_path_pages: 5,
            sample_interval_ms: 30,
            tare_settle_ms: 1000,
            reference_weight_g: 500.0,
            default_calibration: 430.0,
            touch_sensor_connected: false,
            calibration_step_ms: 5000,
            watchdog_timeout_ms: 10_000,
            display_lock_wait_ms: 100,
            main_tick_ms: 100,
        }
    }
}

impl EngineConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn read_success_hold(&self) -> Duration {
        Duration::from_millis(self.read_success_hold_ms)
    }

    pub fn write_pause_poll(&self) -> Duration {
        Duration::from_millis(self.write_pause_poll_ms)
    }

    pub fn tag_settle(&self) -> Duration {
        Duration::from_millis(self.tag_settle_ms)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn tare_settle(&self) -> Duration {
        Duration::from_millis(self.tare_settle_ms)
    }

    pub fn calibration_step(&self) -> Duration {
        Duration::from_millis(self.calibration_step_ms)
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }

    pub fn display_lock_wait(&self) -> Duration {
        Duration::from_millis(self.display_lock_wait_ms)
    }

    pub fn main_tick(&self) -> Duration {
        Duration::from_millis(self.main_tick_ms)
    }
}
