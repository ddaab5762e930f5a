//! Interfaces the core consumes from the rest of the device.
//!
//! The spool database and settings store are async and used behind
//! `Arc<dyn ..>`, so their methods return boxed futures. Display primitives
//! are synchronous; callers serialise them through
//! [`crate::coordinator::DisplayLock`].

use futures_util::future::BoxFuture;

/// Remote spool inventory (Spoolman-style API).
pub trait SpoolDatabase: Send + Sync {
    /// Record the current net weight of a spool.
    fn update_weight<'a>(&'a self, spool_id: &'a str, grams: i16) -> BoxFuture<'a, bool>;

    /// Move a spool to a storage location.
    fn update_location<'a>(&'a self, spool_id: &'a str, location: &'a str) -> BoxFuture<'a, bool>;

    /// Register a filament read from a manufacturer ("brand") tag.
    fn create_brand_record<'a>(&'a self, json: &'a str, uid: &'a str) -> BoxFuture<'a, bool>;
}

/// Persisted key/value settings of the scale.
pub trait SettingsStore: Send + Sync {
    fn load_calibration(&self) -> BoxFuture<'_, anyhow::Result<Option<f32>>>;

    fn save_calibration(&self, factor: f32) -> BoxFuture<'_, anyhow::Result<()>>;

    fn load_auto_tare(&self) -> BoxFuture<'_, anyhow::Result<Option<bool>>>;

    fn save_auto_tare(&self, enabled: bool) -> BoxFuture<'_, anyhow::Result<()>>;
}

/// Drawing primitives of the device display.
pub trait DisplaySurface: Send {
    fn show_progress(&mut self, step: u8, total: u8, title: &str, status: &str);

    fn show_weight(&mut self, grams: i16);

    fn show_message(&mut self, text: &str);

    fn show_icon(&mut self, name: &str);
}
