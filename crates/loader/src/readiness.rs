//! Readiness state machine.
//!
//! ```text
//! Uninitialized ──connected──▶ Loading ──complete──▶ Ready
//!                                 ▲                    │
//!                       reconnect │                    │ connection lost
//!                                 └───── Degraded ◀────┘
//! ```
//!
//! Losing the connection while `Loading` leaves the state unchanged.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::LoaderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    Uninitialized,
    Loading,
    Ready,
    Degraded,
}

impl Readiness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Readiness::Uninitialized => "uninitialized",
            Readiness::Loading => "loading",
            Readiness::Ready => "ready",
            Readiness::Degraded => "degraded",
        }
    }
}

impl std::fmt::Display for Readiness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle signals the gate reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateSignal {
    Connected,
    Completed,
    ConnectionLost,
    ReconnectStarted,
}

/// Pure transition function. `None` means the signal does not apply in this state.
pub fn transition(from: Readiness, signal: GateSignal) -> Option<Readiness> {
    use GateSignal::*;
    use Readiness::*;
    match (from, signal) {
        (Uninitialized, Connected) => Some(Loading),
        (Loading, Completed) => Some(Ready),
        (Ready, ConnectionLost) => Some(Degraded),
        (Degraded, ReconnectStarted) => Some(Loading),
        _ => None,
    }
}

pub struct ReadinessGate {
    tx: watch::Sender<Readiness>,
    synced_once: AtomicBool,
}

impl ReadinessGate {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Readiness::Uninitialized);
        Self {
            tx,
            synced_once: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> Readiness {
        *self.tx.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == Readiness::Ready
    }

    /// Whether a full synchronization has completed at least once.
    pub fn has_synced_once(&self) -> bool {
        self.synced_once.load(Ordering::Acquire)
    }

    /// Probe semantics: healthy unless still on the very first load.
    pub fn probe_ok(&self) -> bool {
        match self.state() {
            Readiness::Uninitialized => false,
            Readiness::Loading => self.has_synced_once(),
            Readiness::Ready | Readiness::Degraded => true,
        }
    }

    /// Apply a lifecycle signal. Returns the new state when it changed.
    pub fn signal(&self, signal: GateSignal) -> Option<Readiness> {
        let mut changed = None;
        self.tx.send_if_modified(|current| match transition(*current, signal) {
            Some(next) => {
                info!(from = %current, to = %next, "readiness changed");
                if next == Readiness::Ready {
                    self.synced_once.store(true, Ordering::Release);
                }
                *current = next;
                changed = Some(next);
                true
            }
            None => {
                debug!(state = %current, ?signal, "readiness signal ignored");
                false
            }
        });
        changed
    }

    pub fn subscribe(&self) -> watch::Receiver<Readiness> {
        self.tx.subscribe()
    }

    /// Suspend until the gate reaches `Ready`. There is no timeout; callers
    /// that need one wrap this in `tokio::time::timeout`.
    pub async fn wait_until_ready(&self) -> Result<(), LoaderError> {
        let mut rx = self.tx.subscribe();
        rx.wait_for(|s| *s == Readiness::Ready)
            .await
            .map(|_| ())
            .map_err(|_| LoaderError::ShutDown)
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}
