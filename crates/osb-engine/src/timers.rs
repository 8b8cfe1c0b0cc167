//! Auto-stop expiration timers.
//!
//! Each armed timer owns its scheduled fire instant and a cancellation
//! channel. Cancellation drops the sender, which wakes the waiting task so it
//! exits without firing; double-cancellation is a no-op. Timer state is never
//! persisted — an unknown sandbox simply has no timer.

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

struct TimerEntry {
    expires_at: DateTime<Utc>,
    generation: u64,
    cancel: oneshot::Sender<()>,
}

/// Table of armed per-sandbox timers.
#[derive(Clone, Default)]
pub struct ExpirationTimers {
    entries: Arc<Mutex<HashMap<String, TimerEntry>>>,
    generations: Arc<AtomicU64>,
}

impl ExpirationTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms (or replaces) the timer for a sandbox. Cancelling the previous
    /// timer happens before the new one is installed, so a replaced timer can
    /// never fire afterwards. `on_fire` runs on its own task with no caller
    /// context attached.
    pub fn schedule<F, Fut>(&self, sandbox_id: &str, after: Duration, on_fire: F)
    where
        F: FnOnce(String) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(after).unwrap_or_else(|_| chrono::Duration::seconds(0));
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);

        {
            let mut entries = self.entries.lock();
            // Dropping the previous sender cancels its waiter.
            entries.insert(
                sandbox_id.to_string(),
                TimerEntry {
                    expires_at,
                    generation,
                    cancel: cancel_tx,
                },
            );
        }

        let id = sandbox_id.to_string();
        let entries = self.entries.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(after) => {
                    {
                        let mut entries = entries.lock();
                        // A replacement racing the deadline wins; only the
                        // generation that armed this entry may fire it.
                        let ours = entries
                            .get(&id)
                            .map(|entry| entry.generation == generation)
                            .unwrap_or(false);
                        if !ours {
                            return;
                        }
                        entries.remove(&id);
                    }
                    debug!(sandbox_id = %id, "expiration timer fired");
                    on_fire(id).await;
                }
                _ = cancel_rx => {
                    // Cancelled or replaced; the entry was already removed.
                }
            }
        });
    }

    /// Cancels an armed timer; unknown ids and repeated cancels are no-ops.
    pub fn cancel(&self, sandbox_id: &str) {
        if let Some(entry) = self.entries.lock().remove(sandbox_id) {
            // Dropping the sender wakes the waiter.
            drop(entry.cancel);
        }
    }

    pub fn expires_at(&self, sandbox_id: &str) -> Option<DateTime<Utc>> {
        self.entries.lock().get(sandbox_id).map(|entry| entry.expires_at)
    }

    pub fn cancel_all(&self) {
        self.entries.lock().clear();
    }

    pub fn armed_count(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn timer_fires_and_removes_itself() {
        let timers = ExpirationTimers::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        timers.schedule("sbx", Duration::from_millis(10), move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timers.expires_at("sbx").is_some());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(timers.expires_at("sbx").is_none());
    }

    #[tokio::test]
    async fn cancel_prevents_fire_and_is_idempotent() {
        let timers = ExpirationTimers::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        timers.schedule("sbx", Duration::from_millis(20), move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        timers.cancel("sbx");
        timers.cancel("sbx");
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(timers.armed_count(), 0);
    }

    #[tokio::test]
    async fn reschedule_replaces_previous_timer() {
        let timers = ExpirationTimers::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        timers.schedule("sbx", Duration::from_millis(20), move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = fired.clone();
        timers.schedule("sbx", Duration::from_millis(40), move |_| async move {
            counter.fetch_add(10, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        // Only the replacement fired.
        assert_eq!(fired.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn cancel_all_clears_every_timer() {
        let timers = ExpirationTimers::new();
        for idx in 0..3 {
            timers.schedule(&format!("sbx-{idx}"), Duration::from_secs(60), |_| async {});
        }
        assert_eq!(timers.armed_count(), 3);
        timers.cancel_all();
        assert_eq!(timers.armed_count(), 0);
    }
}
