//! Simulated load cell: a fixed raw offset plus the load times a gain.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::load_cell::LoadCell;

/// Raw reading of the empty platform.
pub const EMPTY_OFFSET: f32 = 84_000.0;
/// Gain of the simulated cell in counts per gram.
pub const SIM_COUNTS_PER_GRAM: f32 = 430.0;

#[derive(Debug)]
struct CellState {
    load_g: f32,
    ready: bool,
    counts_per_gram: f32,
    tares: u32,
}

fn lock(state: &Arc<Mutex<CellState>>) -> MutexGuard<'_, CellState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SimLoadCell {
    state: Arc<Mutex<CellState>>,
    factor: f32,
    offset: f32,
}

/// Puts weight on the simulated platform.
#[derive(Clone)]
pub struct SimScaleHandle {
    state: Arc<Mutex<CellState>>,
}

impl SimLoadCell {
    pub fn new(counts_per_gram: f32) -> (Self, SimScaleHandle) {
        let state = Arc::new(Mutex::new(CellState {
            load_g: 0.0,
            ready: true,
            counts_per_gram,
            tares: 0,
        }));
        (
            Self {
                state: Arc::clone(&state),
                factor: 1.0,
                offset: 0.0,
            },
            SimScaleHandle { state },
        )
    }

    fn raw(&self) -> f32 {
        let state = lock(&self.state);
        EMPTY_OFFSET + state.load_g * state.counts_per_gram
    }
}

impl LoadCell for SimLoadCell {
    fn is_ready(&mut self) -> bool {
        lock(&self.state).ready
    }

    fn set_scale(&mut self, factor: f32) {
        self.factor = factor;
    }

    fn tare(&mut self) {
        self.offset = self.raw();
        lock(&self.state).tares += 1;
    }

    fn read_units(&mut self) -> f32 {
        (self.raw() - self.offset) / self.factor
    }
}

impl SimScaleHandle {
    pub fn set_load(&self, grams: f32) {
        lock(&self.state).load_g = grams;
    }

    pub fn load(&self) -> f32 {
        lock(&self.state).load_g
    }

    /// Unplug or replug the amplifier.
    pub fn set_ready(&self, ready: bool) {
        lock(&self.state).ready = ready;
    }

    pub fn tares(&self) -> u32 {
        lock(&self.state).tares
    }
}
