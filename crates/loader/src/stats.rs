//! Ingest counters for the loader status endpoint.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

/// Ingestor counters, updated lock-free from the ingest task.
#[derive(Default)]
pub struct IngestStats {
    attempts: AtomicU64,
    connections: AtomicU64,
    events: AtomicU64,
    applied: AtomicU64,
    malformed: AtomicU64,
    ignored: AtomicU64,
    swept: AtomicU64,
    auth_failures: AtomicU64,
    last_event_ms: AtomicI64,
    last_error: Mutex<Option<String>>,
}

/// Point-in-time copy of [`IngestStats`], shaped for the API.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub attempts: u64,
    pub connections: u64,
    pub events: u64,
    pub applied: u64,
    pub malformed: u64,
    pub ignored: u64,
    pub swept: u64,
    pub auth_failures: u64,
    pub last_event_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connected(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn event(&self) {
        self.events.fetch_add(1, Ordering::Relaxed);
        self.last_event_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub(crate) fn applied(&self, n: usize) {
        self.applied.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn ignored(&self) {
        self.ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn swept(&self, n: usize) {
        self.swept.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn failed(&self, err: &crate::error::SourceError) {
        if err.is_auth() {
            self.auth_failures.fetch_add(1, Ordering::Relaxed);
        }
        *self.last_error.lock().unwrap_or_else(|p| p.into_inner()) = Some(err.to_string());
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let last_ms = self.last_event_ms.load(Ordering::Relaxed);
        StatsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            swept: self.swept.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            last_event_at: (last_ms > 0)
                .then(|| Utc.timestamp_millis_opt(last_ms).single())
                .flatten(),
            last_error: self
                .last_error
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;

    #[test]
    fn counts_and_last_error() {
        let s = IngestStats::new();
        assert_eq!(s.snapshot(), StatsSnapshot::default());

        s.attempt();
        s.connected();
        s.event();
        s.applied(3);
        s.malformed();
        s.failed(&SourceError::Unauthorized { status: 401 });
        s.failed(&SourceError::Transport("reset".into()));

        let snap = s.snapshot();
        assert_eq!(snap.attempts, 1);
        assert_eq!(snap.applied, 3);
        assert_eq!(snap.malformed, 1);
        assert_eq!(snap.auth_failures, 1);
        assert!(snap.last_event_at.is_some());
        assert_eq!(snap.last_error.as_deref(), Some("transport error: reset"));
    }
}
