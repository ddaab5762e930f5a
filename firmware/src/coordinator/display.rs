//! Bounded-wait access to the display.
//!
//! A drawer that cannot get the surface in time skips its frame instead of
//! stalling its task. Sequences that must appear atomic (clear, draw,
//! flush) hold one [`DisplayGuard`] and call through it; helpers never take
//! the lock a second time.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

use crate::collaborators::DisplaySurface;

type Surface = Box<dyn DisplaySurface>;

#[derive(Clone)]
pub struct DisplayLock {
    surface: Arc<Mutex<Surface>>,
    wait: Duration,
}

pub struct DisplayGuard {
    guard: OwnedMutexGuard<Surface>,
}

impl Deref for DisplayGuard {
    type Target = dyn DisplaySurface;

    fn deref(&self) -> &Self::Target {
        &**self.guard
    }
}

impl DerefMut for DisplayGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut **self.guard
    }
}

impl DisplayLock {
    pub fn new(surface: impl DisplaySurface + 'static, wait: Duration) -> Self {
        Self {
            surface: Arc::new(Mutex::new(Box::new(surface))),
            wait,
        }
    }

    /// Take the display, or `None` (logged) if it stays busy past the wait.
    pub async fn acquire(&self, purpose: &'static str) -> Option<DisplayGuard> {
        match tokio::time::timeout(self.wait, Arc::clone(&self.surface).lock_owned()).await {
            Ok(guard) => Some(DisplayGuard { guard }),
            Err(_) => {
                warn!(purpose, wait_ms = self.wait.as_millis() as u64, "display busy, skipping draw");
                None
            }
        }
    }

    pub async fn show_progress(&self, step: u8, total: u8, title: &str, status: &str) -> bool {
        match self.acquire("progress").await {
            Some(mut display) => {
                display.show_progress(step, total, title, status);
                true
            }
            None => false,
        }
    }

    pub async fn show_message(&self, text: &str) -> bool {
        match self.acquire("message").await {
            Some(mut display) => {
                display.show_message(text);
                true
            }
            None => false,
        }
    }

    pub async fn show_weight(&self, grams: i16) -> bool {
        match self.acquire("weight").await {
            Some(mut display) => {
                display.show_weight(grams);
                true
            }
            None => false,
        }
    }

    pub async fn show_icon(&self, name: &str) -> bool {
        match self.acquire("icon").await {
            Some(mut display) => {
                display.show_icon(name);
                true
            }
            None => false,
        }
    }
}
