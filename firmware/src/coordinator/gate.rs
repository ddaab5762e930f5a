//! Calibration pause for the background tasks.
//!
//! The scan and weight loops take a read permit for each iteration.
//! Calibration takes the write side, which waits for in-flight iterations
//! to finish and keeps new ones from starting until the pause is dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::info;

#[derive(Clone, Default)]
pub struct TaskGate {
    lock: Arc<RwLock<()>>,
    main_paused: Arc<AtomicBool>,
}

/// Held by a background task for one loop iteration.
pub struct GatePermit {
    _guard: OwnedRwLockReadGuard<()>,
}

/// Write side of the gate. Dropping it resumes every task.
pub struct TaskSuspension {
    _guard: OwnedRwLockWriteGuard<()>,
    main_paused: Arc<AtomicBool>,
}

impl TaskGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no calibration is running, then hold it off for one iteration.
    pub async fn enter(&self) -> GatePermit {
        GatePermit {
            _guard: Arc::clone(&self.lock).read_owned().await,
        }
    }

    /// Suspend the scan and weight tasks and flag the main loop.
    pub async fn suspend(&self) -> TaskSuspension {
        self.main_paused.store(true, Ordering::SeqCst);
        let guard = Arc::clone(&self.lock).write_owned().await;
        info!("background tasks suspended");
        TaskSuspension {
            _guard: guard,
            main_paused: Arc::clone(&self.main_paused),
        }
    }

    /// True while the main loop must stay out of the way.
    pub fn main_paused(&self) -> bool {
        self.main_paused.load(Ordering::SeqCst)
    }
}

impl Drop for TaskSuspension {
    fn drop(&mut self) {
        self.main_paused.store(false, Ordering::SeqCst);
        info!("background tasks resumed");
    }
}
