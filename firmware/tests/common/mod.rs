//! Recording collaborators and an engine harness shared by the
//! integration suites.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use spoolscale_firmware::coordinator::DisplayLock;
use spoolscale_firmware::nfc::sim::{SimFrontend, SimTagHandle};
use spoolscale_firmware::nfc::{ReaderStateMachine, SessionHandle, TagIo};
use spoolscale_firmware::scale::sim::{SIM_COUNTS_PER_GRAM, SimLoadCell, SimScaleHandle};
use spoolscale_firmware::{
    Collaborators, DisplaySurface, Engine, EngineConfig, ReaderState, SettingsStore, SpoolDatabase,
};

/// Spool database that records every call.
#[derive(Default)]
pub struct RecordingSpoolDatabase {
    pub weights: Mutex<Vec<(String, i16)>>,
    pub locations: Mutex<Vec<(String, String)>>,
    pub brands: Mutex<Vec<(String, String)>>,
    reject: AtomicBool,
}

impl RecordingSpoolDatabase {
    /// Make every later call return `false`.
    pub fn reject_all(&self) {
        self.reject.store(true, Ordering::SeqCst);
    }

    fn accepted(&self) -> bool {
        !self.reject.load(Ordering::SeqCst)
    }

    pub fn weights(&self) -> Vec<(String, i16)> {
        self.weights.lock().unwrap().clone()
    }

    pub fn locations(&self) -> Vec<(String, String)> {
        self.locations.lock().unwrap().clone()
    }

    pub fn brands(&self) -> Vec<(String, String)> {
        self.brands.lock().unwrap().clone()
    }
}

impl SpoolDatabase for RecordingSpoolDatabase {
    fn update_weight<'a>(&'a self, spool_id: &'a str, grams: i16) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            self.weights.lock().unwrap().push((spool_id.to_string(), grams));
            self.accepted()
        })
    }

    fn update_location<'a>(&'a self, spool_id: &'a str, location: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            self.locations
                .lock()
                .unwrap()
                .push((spool_id.to_string(), location.to_string()));
            self.accepted()
        })
    }

    fn create_brand_record<'a>(&'a self, json: &'a str, uid: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            self.brands
                .lock()
                .unwrap()
                .push((json.to_string(), uid.to_string()));
            self.accepted()
        })
    }
}

#[derive(Default)]
pub struct MemorySettings {
    pub calibration: Mutex<Option<f32>>,
    pub auto_tare: Mutex<Option<bool>>,
}

impl MemorySettings {
    pub fn calibrated(factor: f32) -> Self {
        Self {
            calibration: Mutex::new(Some(factor)),
            auto_tare: Mutex::new(None),
        }
    }
}

impl SettingsStore for MemorySettings {
    fn load_calibration(&self) -> BoxFuture<'_, anyhow::Result<Option<f32>>> {
        Box::pin(async move { Ok(*self.calibration.lock().unwrap()) })
    }

    fn save_calibration(&self, factor: f32) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            *self.calibration.lock().unwrap() = Some(factor);
            Ok(())
        })
    }

    fn load_auto_tare(&self) -> BoxFuture<'_, anyhow::Result<Option<bool>>> {
        Box::pin(async move { Ok(*self.auto_tare.lock().unwrap()) })
    }

    fn save_auto_tare(&self, enabled: bool) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            *self.auto_tare.lock().unwrap() = Some(enabled);
            Ok(())
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Progress { title: String, status: String },
    Weight(i16),
    Message(String),
    Icon(String),
}

/// Display that keeps every frame it was asked to draw.
#[derive(Clone, Default)]
pub struct RecordingDisplay {
    frames: Arc<Mutex<Vec<Frame>>>,
}

impl RecordingDisplay {
    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().unwrap().clone()
    }

    pub fn shows_status(&self, status: &str) -> bool {
        self.frames()
            .iter()
            .any(|f| matches!(f, Frame::Progress { status: s, .. } if s == status))
    }

    pub fn shows_message(&self, text: &str) -> bool {
        self.frames()
            .iter()
            .any(|f| matches!(f, Frame::Message(m) if m == text))
    }

    pub fn last_weight(&self) -> Option<i16> {
        self.frames().iter().rev().find_map(|f| match f {
            Frame::Weight(grams) => Some(*grams),
            _ => None,
        })
    }
}

impl DisplaySurface for RecordingDisplay {
    fn show_progress(&mut self, _step: u8, _total: u8, title: &str, status: &str) {
        self.frames.lock().unwrap().push(Frame::Progress {
            title: title.to_string(),
            status: status.to_string(),
        });
    }

    fn show_weight(&mut self, grams: i16) {
        self.frames.lock().unwrap().push(Frame::Weight(grams));
    }

    fn show_message(&mut self, text: &str) {
        self.frames.lock().unwrap().push(Frame::Message(text.to_string()));
    }

    fn show_icon(&mut self, name: &str) {
        self.frames.lock().unwrap().push(Frame::Icon(name.to_string()));
    }
}

/// A booted engine on simulated hardware plus handles to poke it.
pub struct Harness {
    pub engine: Arc<Engine<SimFrontend, SimLoadCell>>,
    pub tag: SimTagHandle,
    pub load: SimScaleHandle,
    pub database: Arc<RecordingSpoolDatabase>,
    pub settings: Arc<MemorySettings>,
    pub display: RecordingDisplay,
}

impl Harness {
    pub fn new(config: EngineConfig, settings: MemorySettings) -> Self {
        let (frontend, tag) = SimFrontend::new();
        let (cell, load) = SimLoadCell::new(SIM_COUNTS_PER_GRAM);
        let database = Arc::new(RecordingSpoolDatabase::default());
        let settings = Arc::new(settings);
        let display = RecordingDisplay::default();
        let engine = Arc::new(Engine::boot(
            config,
            frontend,
            cell,
            Collaborators {
                database: Arc::clone(&database) as Arc<dyn SpoolDatabase>,
                settings: Arc::clone(&settings) as Arc<dyn SettingsStore>,
                display: display.clone(),
            },
        ));
        Self {
            engine,
            tag,
            load,
            database,
            settings,
            display,
        }
    }

    /// Calibrated scale with the default timings.
    pub fn calibrated() -> Self {
        Self::new(EngineConfig::default(), MemorySettings::calibrated(SIM_COUNTS_PER_GRAM))
    }

    /// Sleep in small steps until the reader reaches `state`.
    pub async fn wait_for_state(&self, state: ReaderState, limit: Duration) -> bool {
        let step = Duration::from_millis(50);
        let mut waited = Duration::ZERO;
        while waited < limit {
            if self.engine.snapshot().state == state {
                return true;
            }
            tokio::time::sleep(step).await;
            waited += step;
        }
        self.engine.snapshot().state == state
    }
}

/// A reader state machine without the scan loop, driven by the test.
pub struct ReaderFixture {
    pub reader: ReaderStateMachine<SimFrontend>,
    pub tag: SimTagHandle,
    pub database: Arc<RecordingSpoolDatabase>,
    pub display: RecordingDisplay,
}

impl ReaderFixture {
    pub fn new(config: EngineConfig) -> Self {
        let (frontend, tag) = SimFrontend::new();
        let database = Arc::new(RecordingSpoolDatabase::default());
        let display = RecordingDisplay::default();
        let lock = DisplayLock::new(display.clone(), config.display_lock_wait());
        let reader = ReaderStateMachine::new(
            TagIo::new(frontend),
            SessionHandle::new(),
            Arc::clone(&database) as Arc<dyn SpoolDatabase>,
            lock,
            Arc::new(config),
        );
        Self {
            reader,
            tag,
            database,
            display,
        }
    }
}
