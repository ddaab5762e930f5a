//! Raw load-cell samples to a display weight and a stable weight.
//!
//! Two outputs with different thresholds: the display weight follows every
//! gram of change, the stable weight only moves by at least
//! [`STABLE_THRESHOLD`] so downstream reporting is not spammed by noise.

/// Moving-average window.
pub const WINDOW: usize = 8;
/// Low-pass coefficient applied to the moving average.
pub const ALPHA: f32 = 0.3;
/// Change in grams that counts as a new stable weight.
pub const STABLE_THRESHOLD: f32 = 1.5;

/// Consecutive off-zero samples that trigger an automatic tare.
pub const AUTO_TARE_SAMPLES: u32 = 20;

#[derive(Debug, Clone, Default)]
pub struct WeightPipeline {
    buffer: [f32; WINDOW],
    cursor: usize,
    filled: bool,
    filtered: f32,
    last_displayed: i16,
    last_stable: i16,
}

impl WeightPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw reading in grams.
    ///
    /// Returns the new stable weight when it moved by at least the
    /// threshold, `None` otherwise.
    pub fn sample(&mut self, raw: f32) -> Option<i16> {
        self.buffer[self.cursor] = raw;
        self.cursor = (self.cursor + 1) % WINDOW;
        if self.cursor == 0 {
            self.filled = true;
        }

        let mean = self.mean();
        self.filtered = ALPHA * mean + (1.0 - ALPHA) * self.filtered;
        let rounded = self.filtered.round() as i16;
        self.last_displayed = rounded;

        let delta = (i32::from(rounded) - i32::from(self.last_stable)).abs();
        if delta as f32 >= STABLE_THRESHOLD {
            self.last_stable = rounded;
            Some(rounded)
        } else {
            None
        }
    }

    fn mean(&self) -> f32 {
        let count = if self.filled { WINDOW } else { self.cursor };
        if count == 0 {
            return 0.0;
        }
        self.buffer[..count].iter().sum::<f32>() / count as f32
    }

    /// Forget all history. Required after every tare or calibration.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn last_displayed_weight(&self) -> i16 {
        self.last_displayed
    }

    pub fn last_stable_weight(&self) -> i16 {
        self.last_stable
    }
}

/// Detects a scale that drifted off zero while empty.
#[derive(Debug, Clone, Default)]
pub struct AutoTare {
    count: u32,
}

impl AutoTare {
    /// Count one raw reading. Returns `true` once a tare is due.
    pub fn observe(&mut self, raw: f32, enabled: bool) -> bool {
        let drifted = (raw > 2.0 && raw < 7.0) || raw < -2.0;
        if enabled && drifted {
            self.count += 1;
        } else {
            self.count = 0;
        }
        self.is_due()
    }

    pub fn is_due(&self) -> bool {
        self.count >= AUTO_TARE_SAMPLES
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}
