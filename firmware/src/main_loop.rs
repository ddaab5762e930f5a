//! Main task: weight display and the once-per-tag weight report.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{info, warn};

use crate::collaborators::SpoolDatabase;
use crate::config::EngineConfig;
use crate::coordinator::{Coordinator, WatchdogFeed};
use crate::nfc::{ReaderState, SessionHandle};
use crate::scale::WeightHandle;

/// Period of the stability check.
pub const STABILITY_PERIOD: Duration = Duration::from_secs(1);
/// Seconds of steady weight before a report is sent.
pub const REPORT_AFTER: u32 = 3;
const UNCALIBRATED_NOTICE: Duration = Duration::from_secs(1);
const FAILURE_NOTICE: Duration = Duration::from_secs(2);

/// What the weight screen should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightView {
    /// Clearly below zero; the scale wants a tare.
    Negative,
    Grams(i16),
}

impl WeightView {
    /// Readings within two grams of zero are shown as zero.
    pub fn of(displayed: i16) -> Self {
        if displayed < -2 {
            WeightView::Negative
        } else if displayed < 2 {
            WeightView::Grams(0)
        } else {
            WeightView::Grams(displayed)
        }
    }
}

/// Counts seconds of steady, non-empty weight while a tag is on the reader.
#[derive(Debug, Default)]
pub struct StabilityCounter {
    count: u32,
    last_weight: i16,
    sent: bool,
}

impl StabilityCounter {
    /// Record one main-loop tick. `period_elapsed` is true once per
    /// [`STABILITY_PERIOD`].
    pub fn tick(&mut self, weight: i16, state: ReaderState, period_elapsed: bool) {
        if period_elapsed {
            let counting = matches!(
                state,
                ReaderState::Idle | ReaderState::ReadSuccess | ReaderState::WriteSuccess
            );
            if !counting {
                self.count = 0;
            } else if (i32::from(weight) - i32::from(self.last_weight)).abs() <= 2 && weight > 5 {
                self.count += 1;
            } else {
                self.count = 0;
                self.sent = false;
            }
        }
        self.last_weight = weight;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Weight has been steady long enough and nothing was sent for it yet.
    pub fn ready(&self) -> bool {
        self.count > REPORT_AFTER && !self.sent
    }

    pub fn mark_sent(&mut self) {
        self.sent = true;
    }
}

pub struct MainLoop {
    session: SessionHandle,
    weight: WeightHandle,
    database: Arc<dyn SpoolDatabase>,
    coordinator: Coordinator,
    config: Arc<EngineConfig>,
}

impl MainLoop {
    pub fn new(
        session: SessionHandle,
        weight: WeightHandle,
        database: Arc<dyn SpoolDatabase>,
        coordinator: Coordinator,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            session,
            weight,
            database,
            coordinator,
            config,
        }
    }

    /// Main task body. Never returns.
    pub async fn run(self, feed: WatchdogFeed) {
        info!("main task started");
        let mut counter = StabilityCounter::default();
        let mut shown: Option<WeightView> = None;
        let mut was_paused = true;
        let mut last_check = Instant::now();
        loop {
            feed.feed();
            let now = Instant::now();
            let period_elapsed = now.duration_since(last_check) >= STABILITY_PERIOD;
            if period_elapsed {
                last_check = now;
            }
            let pause = self
                .tick(&mut counter, &mut shown, &mut was_paused, period_elapsed)
                .await;
            sleep(pause).await;
        }
    }

    async fn tick(
        &self,
        counter: &mut StabilityCounter,
        shown: &mut Option<WeightView>,
        was_paused: &mut bool,
        period_elapsed: bool,
    ) -> Duration {
        let display = &self.coordinator.display;
        if !self.weight.is_calibrated() {
            if !self.weight.is_calibrating() {
                display.show_message("Scale not calibrated").await;
                *shown = None;
                return UNCALIBRATED_NOTICE;
            }
            return self.config.main_tick();
        }

        let snapshot = self.session.snapshot();
        if self.coordinator.gate.main_paused() || snapshot.write_in_progress {
            *was_paused = true;
        } else {
            let view = WeightView::of(self.weight.displayed_weight());
            let redraw =
                *was_paused || (snapshot.state == ReaderState::Idle && *shown != Some(view));
            if redraw && self.show(view).await {
                *shown = Some(view);
            }
            *was_paused = false;
        }

        let weight = self.weight.current_weight();
        counter.tick(weight, snapshot.state, period_elapsed);

        let reportable = matches!(
            snapshot.state,
            ReaderState::ReadSuccess | ReaderState::WriteSuccess
        );
        if !snapshot.active_spool_id.is_empty()
            && counter.ready()
            && reportable
            && self.session.mark_processed()
        {
            let spool_id = snapshot.active_spool_id;
            if self.database.update_weight(&spool_id, weight).await {
                info!(%spool_id, weight, "weight reported");
                counter.mark_sent();
            } else {
                warn!(%spool_id, weight, "weight report rejected");
                display.show_icon("failed").await;
                *shown = None;
                return FAILURE_NOTICE;
            }
        }
        self.config.main_tick()
    }

    async fn show(&self, view: WeightView) -> bool {
        let display = &self.coordinator.display;
        match view {
            WeightView::Negative => display.show_message("!! -0").await,
            WeightView::Grams(grams) => display.show_weight(grams).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::clearly_negative(-3, WeightView::Negative)]
    #[case::noise_below(-2, WeightView::Grams(0))]
    #[case::noise_above(1, WeightView::Grams(0))]
    #[case::real(2, WeightView::Grams(2))]
    #[case::spool(812, WeightView::Grams(812))]
    fn weight_view(#[case] displayed: i16, #[case] expected: WeightView) {
        assert_eq!(WeightView::of(displayed), expected);
    }

    #[test]
    fn counter_needs_four_steady_periods() {
        let mut counter = StabilityCounter::default();
        for _ in 0..4 {
            assert!(!counter.ready());
            counter.tick(800, ReaderState::ReadSuccess, true);
        }
        // the first period compares against zero
        assert_eq!(counter.count(), 3);
        counter.tick(801, ReaderState::ReadSuccess, true);
        assert!(counter.ready());
    }

    #[test]
    fn counter_only_advances_on_period() {
        let mut counter = StabilityCounter::default();
        counter.tick(800, ReaderState::ReadSuccess, true);
        for _ in 0..50 {
            counter.tick(800, ReaderState::ReadSuccess, false);
        }
        assert_eq!(counter.count(), 0);
        counter.tick(800, ReaderState::ReadSuccess, true);
        assert_eq!(counter.count(), 1);
    }

    #[rstest]
    #[case::moving(ReaderState::ReadSuccess, 840)]
    #[case::empty(ReaderState::ReadSuccess, 4)]
    #[case::reading(ReaderState::Reading, 800)]
    #[case::writing(ReaderState::Writing, 800)]
    #[case::read_error(ReaderState::ReadError, 800)]
    fn counter_resets(#[case] state: ReaderState, #[case] weight: i16) {
        let mut counter = StabilityCounter::default();
        for _ in 0..3 {
            counter.tick(800, ReaderState::ReadSuccess, true);
        }
        assert_eq!(counter.count(), 2);
        counter.tick(weight, state, true);
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn sent_flag_cleared_when_weight_moves() {
        let mut counter = StabilityCounter::default();
        for _ in 0..6 {
            counter.tick(800, ReaderState::ReadSuccess, true);
        }
        counter.mark_sent();
        assert!(!counter.ready());
        counter.tick(500, ReaderState::ReadSuccess, true);
        for _ in 0..5 {
            counter.tick(500, ReaderState::ReadSuccess, true);
        }
        assert!(counter.ready());
    }

    #[test]
    fn counter_handles_extreme_jumps() {
        let mut counter = StabilityCounter::default();
        for _ in 0..3 {
            counter.tick(i16::MAX, ReaderState::ReadSuccess, true);
        }
        assert_eq!(counter.count(), 2);
        counter.tick(i16::MIN, ReaderState::ReadSuccess, true);
        assert_eq!(counter.count(), 0);
        counter.tick(i16::MAX, ReaderState::ReadSuccess, true);
        assert_eq!(counter.count(), 0);
    }
}
