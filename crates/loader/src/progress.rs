//! Initial-load progress counters.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

/// Load progress as reported to subscribers.
///
/// Serialized with the same field names as the upstream `progress` event
/// (`count`, `total`) so the browser-facing stream can reuse the framing.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgressState {
    #[serde(rename = "count")]
    pub received: u64,
    #[serde(rename = "total")]
    pub expected_total: Option<u64>,
    /// `None` while the total is unknown or zero; 100 once complete.
    pub percentage: Option<f64>,
    pub complete: bool,
}

impl ProgressState {
    fn derive(received: u64, expected_total: Option<u64>, complete: bool) -> Self {
        let percentage = match expected_total {
            _ if complete => Some(100.0),
            Some(total) if total > 0 => {
                Some((received as f64 / total as f64 * 100.0).clamp(0.0, 100.0))
            }
            _ => None,
        };
        Self {
            received,
            expected_total,
            percentage,
            complete,
        }
    }
}

/// Receives every state change of a [`ProgressTracker`].
pub trait ProgressListener: Send + Sync {
    fn on_progress(&self, state: &ProgressState);
}

#[derive(Default)]
struct Counters {
    received: u64,
    expected_total: Option<u64>,
    complete: bool,
}

/// Mutated only by the ingestor; read from anywhere.
#[derive(Default)]
pub struct ProgressTracker {
    counters: Mutex<Counters>,
    listeners: Mutex<Vec<Arc<dyn ProgressListener>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn ProgressListener>) {
        lock(&self.listeners).push(listener);
    }

    pub fn current_state(&self) -> ProgressState {
        let c = lock(&self.counters);
        ProgressState::derive(c.received, c.expected_total, c.complete)
    }

    pub fn record_received(&self) {
        self.mutate(|c| {
            c.received += 1;
            true
        });
    }

    /// Raise the received count to `count` (upstream-reported); never lowers it.
    pub fn observe_count(&self, count: u64) {
        self.mutate(|c| {
            if count > c.received {
                c.received = count;
                true
            } else {
                false
            }
        });
    }

    pub fn set_expected_total(&self, total: u64) {
        self.mutate(|c| {
            if c.expected_total == Some(total) {
                return false;
            }
            c.expected_total = Some(total);
            true
        });
    }

    /// Freeze at the end of a full load. An unknown total becomes the received count.
    pub fn mark_complete(&self) {
        self.mutate(|c| {
            c.expected_total = Some(c.expected_total.unwrap_or(c.received));
            c.complete = true;
            true
        });
    }

    /// Start over for a new synchronization.
    pub fn reset(&self) {
        let state = {
            let mut c = lock(&self.counters);
            *c = Counters::default();
            ProgressState::derive(0, None, false)
        };
        self.notify(&state);
    }

    fn mutate(&self, f: impl FnOnce(&mut Counters) -> bool) {
        let state = {
            let mut c = lock(&self.counters);
            if c.complete || !f(&mut c) {
                return;
            }
            ProgressState::derive(c.received, c.expected_total, c.complete)
        };
        self.notify(&state);
    }

    fn notify(&self, state: &ProgressState) {
        let listeners = lock(&self.listeners).clone();
        for listener in listeners {
            listener.on_progress(state);
        }
    }
}

/// A poisoned counter mutex only means a listener panicked mid-update; the
/// counters themselves are always left consistent.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
