//! Load-cell amplifier abstraction (HX711 and friends).

/// A load cell behind a 24-bit ADC.
///
/// Readings are in calibrated units: raw counts minus the tare offset,
/// divided by the scale factor.
pub trait LoadCell: Send + 'static {
    /// A conversion is available.
    fn is_ready(&mut self) -> bool;

    /// Counts per gram.
    fn set_scale(&mut self, factor: f32);

    /// Take the current raw reading as zero.
    fn tare(&mut self);

    /// One reading in calibrated units.
    fn read_units(&mut self) -> f32;

    /// Mean of `samples` readings.
    fn read_average(&mut self, samples: u8) -> f32 {
        let samples = samples.max(1);
        let total: f32 = (0..samples).map(|_| self.read_units()).sum();
        total / f32::from(samples)
    }
}
