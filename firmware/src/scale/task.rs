//! Weight task, tare and calibration.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI16, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::load_cell::LoadCell;
use super::pipeline::{AutoTare, WeightPipeline};
use crate::collaborators::SettingsStore;
use crate::config::EngineConfig;
use crate::coordinator::{Coordinator, WatchdogFeed};
use crate::error::ScaleError;

/// Poll interval of the boot-time sensor search.
pub const SENSOR_SEARCH_INTERVAL: Duration = Duration::from_secs(5);
/// How long calibration waits for the amplifier.
pub const CALIBRATION_READY_TIMEOUT: Duration = Duration::from_secs(1);
const READY_POLL: Duration = Duration::from_millis(10);
const CALIBRATION_SAMPLES: u8 = 10;
const CALIBRATION_NOTICE: Duration = Duration::from_secs(2);

/// Values the weight task publishes and the flags other tasks raise for it.
#[derive(Debug, Default)]
struct WeightShared {
    weight: AtomicI16,
    displayed: AtomicI16,
    tare_requested: AtomicBool,
    reset_requested: AtomicBool,
    auto_tare: AtomicBool,
    calibrated: AtomicBool,
    calibrating: AtomicBool,
}

/// Cheap read access to the weight and request flags.
#[derive(Clone, Default)]
pub struct WeightHandle {
    shared: Arc<WeightShared>,
}

impl WeightHandle {
    /// Last stable weight in grams.
    pub fn current_weight(&self) -> i16 {
        self.shared.weight.load(Ordering::Relaxed)
    }

    /// Display weight in grams (follows every gram).
    pub fn displayed_weight(&self) -> i16 {
        self.shared.displayed.load(Ordering::Relaxed)
    }

    /// Ask the weight task to tare before its next sample.
    pub fn request_tare(&self) {
        self.shared.tare_requested.store(true, Ordering::SeqCst);
    }

    fn request_filter_reset(&self) {
        self.shared.reset_requested.store(true, Ordering::SeqCst);
    }

    pub fn auto_tare_enabled(&self) -> bool {
        self.shared.auto_tare.load(Ordering::Relaxed)
    }

    pub fn is_calibrated(&self) -> bool {
        self.shared.calibrated.load(Ordering::Relaxed)
    }

    pub fn is_calibrating(&self) -> bool {
        self.shared.calibrating.load(Ordering::Relaxed)
    }
}

/// Owner of the load cell.
pub struct Scale<L> {
    cell: Arc<Mutex<L>>,
    handle: WeightHandle,
    settings: Arc<dyn SettingsStore>,
    coordinator: Coordinator,
    config: Arc<EngineConfig>,
}

impl<L> Clone for Scale<L> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
            handle: self.handle.clone(),
            settings: Arc::clone(&self.settings),
            coordinator: self.coordinator.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl<L: LoadCell> Scale<L> {
    pub fn new(
        cell: L,
        settings: Arc<dyn SettingsStore>,
        coordinator: Coordinator,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            cell: Arc::new(Mutex::new(cell)),
            handle: WeightHandle::default(),
            settings,
            coordinator,
            config,
        }
    }

    pub fn handle(&self) -> WeightHandle {
        self.handle.clone()
    }

    /// Load settings, find the sensor and spawn the weight task.
    ///
    /// Waits for the amplifier without a deadline; nothing else on the
    /// device makes sense without it.
    pub async fn start(&self) -> Result<JoinHandle<()>, ScaleError> {
        let shared = &self.handle.shared;
        let factor = match self.settings.load_calibration().await? {
            Some(factor) => {
                shared.calibrated.store(true, Ordering::SeqCst);
                factor
            }
            None => {
                warn!("scale not calibrated, using default factor");
                shared.calibrated.store(false, Ordering::SeqCst);
                self.config.default_calibration
            }
        };
        let auto_tare = self
            .settings
            .load_auto_tare()
            .await?
            .unwrap_or(!self.config.touch_sensor_connected);
        shared.auto_tare.store(auto_tare, Ordering::SeqCst);

        let display = &self.coordinator.display;
        display.show_progress(6, 7, "Booting", "Searching scale").await;
        loop {
            if self.cell.lock().await.is_ready() {
                break;
            }
            warn!("load cell not ready, retrying");
            sleep(SENSOR_SEARCH_INTERVAL).await;
        }

        self.cell.lock().await.set_scale(factor);
        display.show_weight(0).await;
        info!(factor, auto_tare, calibrated = self.handle.is_calibrated(), "scale ready");

        let feed = self.coordinator.watchdog.subscribe("weight");
        let task = tokio::spawn(self.clone().run(feed));
        self.handle.request_tare();
        Ok(task)
    }

    async fn run(self, feed: WatchdogFeed) {
        let mut pipeline = WeightPipeline::new();
        let mut auto = AutoTare::default();
        loop {
            feed.feed();
            {
                let _permit = self.coordinator.gate.enter().await;
                self.tick(&mut pipeline, &mut auto).await;
            }
            sleep(self.config.sample_interval()).await;
        }
    }

    async fn tick(&self, pipeline: &mut WeightPipeline, auto: &mut AutoTare) {
        let shared = &self.handle.shared;
        if shared.reset_requested.swap(false, Ordering::SeqCst) {
            pipeline.reset();
        }

        let mut cell = self.cell.lock().await;
        if !cell.is_ready() {
            return;
        }

        let manual = shared.tare_requested.swap(false, Ordering::SeqCst);
        if manual || auto.is_due() {
            info!(manual, "taring scale");
            let display = &self.coordinator.display;
            display.show_message("TARE Scale").await;
            sleep(self.config.tare_settle()).await;
            cell.tare();
            pipeline.reset();
            auto.reset();
            sleep(self.config.tare_settle()).await;
            shared.weight.store(0, Ordering::Relaxed);
            shared.displayed.store(0, Ordering::Relaxed);
            display.show_weight(0).await;
        }

        let raw = cell.read_units();
        if let Some(stable) = pipeline.sample(raw) {
            debug!(stable, "stable weight changed");
            shared.weight.store(stable, Ordering::Relaxed);
        }
        shared
            .displayed
            .store(pipeline.last_displayed_weight(), Ordering::Relaxed);
        auto.observe(raw, shared.auto_tare.load(Ordering::Relaxed));
    }

    /// Interactive calibration against the reference weight.
    ///
    /// Scan and weight tasks stay suspended for the whole routine.
    pub async fn calibrate(&self) -> Result<f32, ScaleError> {
        let shared = &self.handle.shared;
        shared.calibrating.store(true, Ordering::SeqCst);
        let pause = self.coordinator.pause_for_calibration().await;
        let outcome = self.calibration_steps().await;
        drop(pause);
        shared.calibrating.store(false, Ordering::SeqCst);

        match outcome {
            Ok(factor) => {
                shared.calibrated.store(true, Ordering::SeqCst);
                info!(factor, "calibration complete");
            }
            Err(ref e) => warn!(error = %e, "calibration failed"),
        }
        outcome
    }

    async fn calibration_steps(&self) -> Result<f32, ScaleError> {
        let display = &self.coordinator.display;
        let mut cell = self.cell.lock().await;

        if !wait_ready(&mut *cell, CALIBRATION_READY_TIMEOUT).await {
            display.show_message("Scale not found").await;
            return Err(ScaleError::SensorNotFound);
        }

        cell.set_scale(1.0);
        display.show_progress(0, 3, "Scale Cal.", "Empty Scale").await;
        sleep(self.config.calibration_step()).await;
        cell.tare();

        display.show_progress(1, 3, "Scale Cal.", "Place the weight").await;
        sleep(self.config.calibration_step()).await;
        let factor = cell.read_average(CALIBRATION_SAMPLES) / self.config.reference_weight_g;

        if factor.is_nan() || factor <= 0.0 {
            display.show_progress(3, 3, "Failure", "Calibration error").await;
            return Err(ScaleError::InvalidCalibration { factor });
        }

        self.settings.save_calibration(factor).await?;
        match self.settings.load_calibration().await? {
            Some(stored) if stored == factor => debug!(stored, "calibration persisted"),
            stored => warn!(?stored, factor, "stored calibration differs"),
        }

        display.show_progress(2, 3, "Scale Cal.", "Remove weight").await;
        cell.set_scale(factor);
        self.handle.request_filter_reset();
        sleep(CALIBRATION_NOTICE).await;

        display.show_progress(3, 3, "Scale Cal.", "Completed").await;
        self.handle.request_tare();
        sleep(CALIBRATION_NOTICE).await;
        Ok(factor)
    }

    /// Persist and apply the auto-tare preference.
    pub async fn set_auto_tare(&self, enabled: bool) -> Result<(), ScaleError> {
        self.settings.save_auto_tare(enabled).await?;
        self.handle.shared.auto_tare.store(enabled, Ordering::SeqCst);
        info!(enabled, "auto-tare preference saved");
        Ok(())
    }
}

async fn wait_ready<L: LoadCell>(cell: &mut L, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if cell.is_ready() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        sleep(READY_POLL).await;
    }
}
