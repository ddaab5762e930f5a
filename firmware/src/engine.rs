//! Boot sequence and the surface the rest of the device talks to.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::collaborators::{DisplaySurface, SettingsStore, SpoolDatabase};
use crate::config::EngineConfig;
use crate::coordinator::{Coordinator, Watchdog};
use crate::error::{ScaleError, TagError};
use crate::main_loop::MainLoop;
use crate::nfc::{NfcFrontend, ReaderSnapshot, ReaderStateMachine, SessionHandle, TagIo};
use crate::scale::{LoadCell, Scale};

/// Services the core is wired to at boot.
pub struct Collaborators<D> {
    pub database: Arc<dyn SpoolDatabase>,
    pub settings: Arc<dyn SettingsStore>,
    pub display: D,
}

pub struct Engine<F, L> {
    config: Arc<EngineConfig>,
    coordinator: Coordinator,
    reader: ReaderStateMachine<F>,
    scale: Scale<L>,
    database: Arc<dyn SpoolDatabase>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<F: NfcFrontend, L: LoadCell> Engine<F, L> {
    /// Wire hardware and collaborators together. Nothing runs until
    /// [`Engine::start_tag_engine`] and [`Engine::start_scale`].
    pub fn boot<D>(config: EngineConfig, frontend: F, load_cell: L, collaborators: Collaborators<D>) -> Self
    where
        D: DisplaySurface + 'static,
    {
        let config = Arc::new(config);
        let Collaborators {
            database,
            settings,
            display,
        } = collaborators;
        let coordinator = Coordinator::new(&config, display);
        let reader = ReaderStateMachine::new(
            TagIo::new(frontend),
            SessionHandle::new(),
            Arc::clone(&database),
            coordinator.display.clone(),
            Arc::clone(&config),
        );
        let scale = Scale::new(load_cell, settings, coordinator.clone(), Arc::clone(&config));
        Self {
            config,
            coordinator,
            reader,
            scale,
            database,
            tasks: Mutex::new(Vec::new()),
        }
    }

    fn track(&self, task: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
    }

    /// Check the reader and start the scan task.
    pub async fn start_tag_engine(&self) -> Result<(), TagError> {
        let display = &self.coordinator.display;
        display.show_progress(4, 7, "Booting", "Starting NFC").await;
        let io = self.reader.io();
        io.recover_bus().await;
        let version = match io.firmware_version().await {
            Ok(version) => version,
            Err(e) => {
                error!(error = %e, "tag reader not responding");
                display.show_progress(4, 7, "Failure", e.display_text()).await;
                return Err(e);
            }
        };
        info!(version = %format!("{version:#010x}"), "tag reader found");

        let feed = self.coordinator.watchdog.subscribe("scan");
        let gate = self.coordinator.gate.clone();
        self.track(tokio::spawn(self.reader.clone().run_scan_loop(gate, feed)));
        Ok(())
    }

    /// Find the load cell, start the weight task and the main task.
    pub async fn start_scale(&self) -> Result<(), ScaleError> {
        let weight_task = self.scale.start().await?;
        self.track(weight_task);

        let main = MainLoop::new(
            self.reader.session().clone(),
            self.scale.handle(),
            Arc::clone(&self.database),
            self.coordinator.clone(),
            Arc::clone(&self.config),
        );
        let feed = self.coordinator.watchdog.subscribe("main");
        self.track(tokio::spawn(main.run(feed)));
        Ok(())
    }

    /// Queue a tag write. The outcome shows up in the session state.
    pub async fn request_write(&self, is_spool_tag: bool, json: &str) -> Result<(), TagError> {
        self.reader.request_write(is_spool_tag, json).await.map(drop)
    }

    pub fn snapshot(&self) -> ReaderSnapshot {
        self.reader.session().snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<ReaderSnapshot> {
        self.reader.session().subscribe()
    }

    /// Last stable weight in grams.
    pub fn current_weight(&self) -> i16 {
        self.scale.handle().current_weight()
    }

    pub fn displayed_weight(&self) -> i16 {
        self.scale.handle().displayed_weight()
    }

    pub fn is_calibrated(&self) -> bool {
        self.scale.handle().is_calibrated()
    }

    pub fn auto_tare_enabled(&self) -> bool {
        self.scale.handle().auto_tare_enabled()
    }

    pub fn request_tare(&self) {
        self.scale.handle().request_tare();
    }

    pub async fn set_auto_tare(&self, enabled: bool) -> Result<(), ScaleError> {
        self.scale.set_auto_tare(enabled).await
    }

    /// Run the interactive calibration. Returns the new factor.
    pub async fn calibrate(&self) -> Result<f32, ScaleError> {
        self.scale.calibrate().await
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.coordinator.watchdog
    }
}

impl<F, L> Drop for Engine<F, L> {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}
