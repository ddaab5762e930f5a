//! Task liveness watchdog.
//!
//! Each long-running task subscribes a feed and touches it every iteration.
//! A monitor task checks the feeds and runs the starvation handler once
//! when any of them goes quiet for longer than the timeout. On the device
//! the handler resets the chip; the host build aborts the process.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error};

#[derive(Clone)]
pub struct Watchdog {
    inner: Arc<Inner>,
}

struct Inner {
    epoch: Instant,
    timeout: Duration,
    feeds: Mutex<Vec<(String, Arc<AtomicU64>)>>,
    paused: AtomicUsize,
}

/// Starvation checks are off while one of these is alive.
pub struct WatchdogPause {
    inner: Arc<Inner>,
}

impl Drop for WatchdogPause {
    fn drop(&mut self) {
        self.inner.refresh_all();
        self.inner.paused.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Inner {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn refresh_all(&self) {
        let now = self.now_ms();
        for (_, last) in self.feeds.lock().unwrap_or_else(PoisonError::into_inner).iter() {
            last.store(now, Ordering::Relaxed);
        }
    }
}

/// Liveness token owned by one task.
#[derive(Clone)]
pub struct WatchdogFeed {
    epoch: Instant,
    last: Arc<AtomicU64>,
}

impl WatchdogFeed {
    pub fn feed(&self) {
        self.last
            .store(self.epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
    }
}

impl Watchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                epoch: Instant::now(),
                timeout,
                feeds: Mutex::new(Vec::new()),
                paused: AtomicUsize::new(0),
            }),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Register a task. The feed starts out fresh.
    pub fn subscribe(&self, name: &str) -> WatchdogFeed {
        let feed = WatchdogFeed {
            epoch: self.inner.epoch,
            last: Arc::new(AtomicU64::new(0)),
        };
        feed.feed();
        self.inner
            .feeds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name.to_string(), Arc::clone(&feed.last)));
        debug!(task = name, "watchdog feed registered");
        feed
    }

    /// Suspend starvation checks, e.g. while tasks are deliberately parked.
    /// Every feed counts as fresh when the pause ends.
    pub fn pause(&self) -> WatchdogPause {
        self.inner.paused.fetch_add(1, Ordering::SeqCst);
        WatchdogPause {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Names of tasks that have not fed within the timeout.
    pub fn starved(&self) -> Vec<String> {
        if self.inner.paused.load(Ordering::SeqCst) > 0 {
            return Vec::new();
        }
        let now = self.inner.now_ms();
        let limit = self.inner.timeout.as_millis() as u64;
        self.inner
            .feeds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, last)| now.saturating_sub(last.load(Ordering::Relaxed)) > limit)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Spawn the monitor. `on_starved` runs once, for the first starved task.
    pub fn spawn_monitor<H>(&self, on_starved: H) -> JoinHandle<()>
    where
        H: FnOnce(&str) + Send + 'static,
    {
        let watchdog = self.clone();
        let period = (self.inner.timeout / 4).max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Some(task) = watchdog.starved().into_iter().next() {
                    error!(task = %task, timeout_ms = watchdog.timeout().as_millis() as u64, "watchdog starved");
                    on_starved(&task);
                    return;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_for_the_starved_task_only() {
        let watchdog = Watchdog::new(Duration::from_secs(10));
        let busy = watchdog.subscribe("scan");
        let _stuck = watchdog.subscribe("weight");
        let (tx, rx) = tokio::sync::oneshot::channel();
        let _monitor = watchdog.spawn_monitor(move |task| {
            let _ = tx.send(task.to_string());
        });

        let feeder = tokio::spawn(async move {
            loop {
                busy.feed();
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        });

        let started = Instant::now();
        assert_eq!(rx.await.unwrap(), "weight");
        assert!(started.elapsed() > Duration::from_secs(10));
        feeder.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn fed_tasks_are_not_starved() {
        let watchdog = Watchdog::new(Duration::from_millis(500));
        let feed = watchdog.subscribe("main");
        tokio::time::sleep(Duration::from_millis(400)).await;
        feed.feed();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(watchdog.starved().is_empty());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(watchdog.starved(), vec!["main".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_hides_parked_tasks() {
        let watchdog = Watchdog::new(Duration::from_millis(500));
        let _feed = watchdog.subscribe("scan");
        let pause = watchdog.pause();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(watchdog.starved().is_empty());
        drop(pause);
        assert!(watchdog.starved().is_empty());
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(watchdog.starved(), vec!["scan".to_string()]);
    }
}
