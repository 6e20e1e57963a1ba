//! Owned periodic background tasks.
//!
//! A [`PeriodicTask`] runs an async tick at a fixed interval on its own tokio
//! task. Ticks never overlap: each one is awaited before the next interval is
//! considered, and intervals missed while a tick was running are skipped
//! rather than queued. Stopping cancels future ticks but lets an in-flight
//! tick finish.

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Handle to a running periodic task.
#[derive(Debug)]
pub struct PeriodicTask {
    name: String,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTask {
    /// Spawn a task calling `tick` every `interval`, starting immediately.
    pub fn spawn<F, Fut>(name: impl Into<String>, interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            interval_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut ticks = 0u64;

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        debug!(task = %task_name, ticks, "Periodic task shutting down");
                        break;
                    }
                    _ = interval_timer.tick() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                        ticks += 1;
                        tick().await;
                    }
                }
            }
        });

        info!(task = %name, interval_ms = interval.as_millis() as u64, "Started periodic task");
        Self {
            name,
            shutdown_tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Task name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request a stop without waiting. Safe to call repeatedly.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Whether a stop was requested.
    pub fn is_stopping(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Whether the task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map_or(true, JoinHandle::is_finished)
    }

    /// Stop and wait for the task to exit, including any in-flight tick.
    pub async fn join(&self) {
        self.stop();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(task = %self.name, error = %e, "Periodic task ended abnormally");
            }
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_until_stopped() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();
        let task = PeriodicTask::spawn("counter", Duration::from_secs(1), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(3500)).await;
        task.join().await;
        let seen = count.load(Ordering::SeqCst);
        assert!((3..=4).contains(&seen), "saw {} ticks", seen);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), seen);
        assert!(task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_tick_never_overlaps() {
        let running = Arc::new(AtomicU32::new(0));
        let overlaps = Arc::new(AtomicU32::new(0));
        let ticks = Arc::new(AtomicU32::new(0));
        let (r, o, t) = (running.clone(), overlaps.clone(), ticks.clone());

        let task = PeriodicTask::spawn("slow", Duration::from_millis(100), move || {
            let (r, o, t) = (r.clone(), o.clone(), t.clone());
            async move {
                if r.fetch_add(1, Ordering::SeqCst) > 0 {
                    o.fetch_add(1, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(350)).await;
                t.fetch_add(1, Ordering::SeqCst);
                r.fetch_sub(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        task.join().await;

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        // Skipped intervals are not replayed: far fewer than 20 ticks.
        assert!(ticks.load(Ordering::SeqCst) <= 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_lets_inflight_tick_finish() {
        let finished = Arc::new(AtomicU32::new(0));
        let f = finished.clone();
        let task = PeriodicTask::spawn("inflight", Duration::from_secs(10), move || {
            let f = f.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                f.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        task.stop();
        assert!(task.is_stopping());
        task.join().await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}
