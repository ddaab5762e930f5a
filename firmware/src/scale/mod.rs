//! Scale: load cell, weight filtering, tare and calibration.
//!
//! The weight task samples every 30 ms and publishes two values through
//! [`WeightHandle`]: a display weight that follows every gram and a stable
//! weight that only moves on changes of at least 1.5 g.
//!
//! Calibration runs with the scan and weight tasks suspended (see
//! [`crate::coordinator::Coordinator::pause_for_calibration`]).

pub mod load_cell;
pub mod pipeline;
pub mod sim;
pub mod task;

pub use load_cell::LoadCell;
pub use pipeline::{AutoTare, WeightPipeline};
pub use task::{Scale, WeightHandle};
