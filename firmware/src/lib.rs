//! Core of the spool scale: contactless-tag engine, weight pipeline and the
//! coordination that lets both share one device.
//!
//! Hardware sits behind [`nfc::NfcFrontend`] and [`scale::LoadCell`];
//! simulated implementations live in [`nfc::sim`] and [`scale::sim`].
//! Everything the core needs from the rest of the device is in
//! [`collaborators`].

pub mod collaborators;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod main_loop;
pub mod nfc;
pub mod scale;

pub use collaborators::{DisplaySurface, SettingsStore, SpoolDatabase};
pub use config::EngineConfig;
pub use engine::{Collaborators, Engine};
pub use error::{ScaleError, TagError};
pub use nfc::{ReaderSnapshot, ReaderState};
