//! Manual I2C bus recovery.
//!
//! A slave that lost clock sync can hold SDA low forever. Releasing SDA and
//! clocking SCL nine times lets it finish the byte it thinks it is sending,
//! after which the master can issue a fresh START.

use std::time::Duration;

use tracing::info;

/// Clock pulses needed to flush one byte plus ACK.
pub const RECOVERY_PULSES: usize = 9;

const HALF_PERIOD: Duration = Duration::from_micros(10);
const RELEASE_SETTLE: Duration = Duration::from_millis(10);

/// Direct control over the two bus lines.
pub trait RecoveryLines: Send {
    /// Put SDA into input/pull-up so the slave can drive it.
    fn release_data(&mut self);

    /// Drive SCL as an output at the given level.
    fn drive_clock(&mut self, high: bool);

    /// Return SCL to input/pull-up.
    fn release_clock(&mut self);
}

/// Run the un-wedge sequence. Best effort: nothing on the bus reports back.
pub async fn pulse_recovery<L: RecoveryLines>(lines: &mut L) {
    info!("attempting I2C bus recovery");
    lines.release_data();
    for _ in 0..RECOVERY_PULSES {
        lines.drive_clock(true);
        tokio::time::sleep(HALF_PERIOD).await;
        lines.drive_clock(false);
        tokio::time::sleep(HALF_PERIOD).await;
    }
    lines.drive_clock(true);
    lines.release_clock();
    tokio::time::sleep(RELEASE_SETTLE).await;
    info!("I2C bus recovery sequence complete");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Probe {
        events: Vec<&'static str>,
    }

    impl RecoveryLines for Probe {
        fn release_data(&mut self) {
            self.events.push("sda-release");
        }

        fn drive_clock(&mut self, high: bool) {
            self.events.push(if high { "scl-high" } else { "scl-low" });
        }

        fn release_clock(&mut self) {
            self.events.push("scl-release");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn releases_data_then_pulses_clock_nine_times() {
        let mut probe = Probe::default();
        pulse_recovery(&mut probe).await;

        assert_eq!(probe.events.first(), Some(&"sda-release"));
        assert_eq!(probe.events.last(), Some(&"scl-release"));
        let lows = probe.events.iter().filter(|e| **e == "scl-low").count();
        assert_eq!(lows, RECOVERY_PULSES);
    }
}
