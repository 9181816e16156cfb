//! The single task that owns the upstream connection.
//!
//! Each connection is treated as a full resend: progress restarts from zero,
//! every identity delivered is remembered, and on `complete` any record the
//! connection did not mention is swept from the store. Records are never
//! cleared up front, so readers keep the last known data while a resync runs.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::auth::TokenProvider;
use crate::backoff::{Backoff, RetryClass};
use crate::error::SourceError;
use crate::event::{self, DecodeError, SseFrame, StreamEvent};
use crate::progress::ProgressTracker;
use crate::readiness::{GateSignal, ReadinessGate};
use crate::source::{EventSource, FrameStream};
use crate::stats::IngestStats;
use crate::store::{Mutation, SnapshotStore};

/// How one connection ended. `progressed` means the connection delivered
/// data or outlived the longest backoff delay; only then does the retry
/// delay start over.
#[derive(Debug)]
enum ConnectionEnd {
    Shutdown,
    /// Upstream closed the stream cleanly.
    Closed { progressed: bool },
    Failed { err: SourceError, progressed: bool },
}

pub(crate) struct Shared {
    pub store: Arc<SnapshotStore>,
    pub tracker: Arc<ProgressTracker>,
    pub gate: Arc<ReadinessGate>,
    pub stats: Arc<IngestStats>,
}

pub(crate) struct Ingestor {
    name: String,
    source: Arc<dyn EventSource>,
    tokens: Arc<dyn TokenProvider>,
    shared: Shared,
    backoff: Backoff,
    open_timeout: Duration,
    inactivity: Duration,
    max_batch: usize,
    shutdown: watch::Receiver<bool>,
    attempted: watch::Sender<bool>,
    seen: HashSet<String>,
    delivered: bool,
}

impl Ingestor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        source: Arc<dyn EventSource>,
        tokens: Arc<dyn TokenProvider>,
        shared: Shared,
        backoff: Backoff,
        open_timeout: Duration,
        inactivity: Duration,
        max_batch: usize,
        shutdown: watch::Receiver<bool>,
        attempted: watch::Sender<bool>,
    ) -> Self {
        Self {
            name,
            source,
            tokens,
            shared,
            backoff,
            open_timeout,
            inactivity,
            max_batch: max_batch.max(1),
            shutdown,
            attempted,
            seen: HashSet::new(),
            delivered: false,
        }
    }

    pub async fn run(mut self) {
        info!(loader = %self.name, upstream = %self.source.describe(), "ingestor started");
        let mut shutdown = self.shutdown.clone();

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.shared.stats.attempt();

            let (err, progressed) = match self.connection().await {
                ConnectionEnd::Shutdown => break,
                ConnectionEnd::Closed { progressed } => {
                    info!(loader = %self.name, "upstream closed the stream");
                    (None, progressed)
                }
                ConnectionEnd::Failed { err, progressed } => (Some(err), progressed),
            };

            self.shared.gate.signal(GateSignal::ConnectionLost);
            if progressed {
                self.backoff.reset();
            }

            if let Some(err) = &err {
                self.shared.stats.failed(err);
                let class = RetryClass::of(err);
                if !self.backoff.policy().should_retry(class) {
                    error!(loader = %self.name, error = %err, "giving up on upstream");
                    break;
                }
            }

            let delay = self.backoff.next_delay();
            match &err {
                Some(err) if err.is_auth() => error!(
                    loader = %self.name,
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "upstream authentication failed, retrying"
                ),
                Some(err) => warn!(
                    loader = %self.name,
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "upstream connection lost, retrying"
                ),
                None => info!(
                    loader = %self.name,
                    retry_in_ms = delay.as_millis() as u64,
                    "reconnecting"
                ),
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancelled(&mut shutdown) => break,
            }
        }

        self.attempt_done();
        info!(loader = %self.name, "ingestor stopped");
    }

    /// Marks the first connection attempt as made; later calls are no-ops.
    fn attempt_done(&self) {
        self.attempted.send_if_modified(|done| !std::mem::replace(done, true));
    }

    async fn connection(&mut self) -> ConnectionEnd {
        let mut shutdown = self.shutdown.clone();

        let opened = tokio::select! {
            r = tokio::time::timeout(self.open_timeout, self.open()) => {
                r.unwrap_or_else(|_| Err(SourceError::OpenTimeout(self.open_timeout)))
            }
            _ = cancelled(&mut shutdown) => return ConnectionEnd::Shutdown,
        };

        let mut frames = match opened {
            Ok(frames) => frames.fuse(),
            Err(err) => {
                if err.is_auth() {
                    self.tokens.invalidate().await;
                }
                self.attempt_done();
                return ConnectionEnd::Failed {
                    err,
                    progressed: false,
                };
            }
        };

        info!(loader = %self.name, "connected to upstream");
        self.shared.stats.connected();
        // Only one of these applies: first connect, or resync after Degraded.
        self.shared.gate.signal(GateSignal::Connected);
        self.shared.gate.signal(GateSignal::ReconnectStarted);
        self.shared.tracker.reset();
        self.seen.clear();
        self.delivered = false;
        self.attempt_done();

        let opened_at = Instant::now();
        let mut batch: Vec<Mutation> = Vec::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => {
                    self.flush(&mut batch);
                    return ConnectionEnd::Shutdown;
                }
                next = tokio::time::timeout(self.inactivity, frames.next()) => next,
            };

            let first = match next {
                Err(_) => {
                    self.flush(&mut batch);
                    return ConnectionEnd::Failed {
                        err: SourceError::Inactive(self.inactivity),
                        progressed: self.progressed(opened_at),
                    };
                }
                Ok(None) => {
                    self.flush(&mut batch);
                    return ConnectionEnd::Closed {
                        progressed: self.progressed(opened_at),
                    };
                }
                Ok(Some(item)) => item,
            };

            // Drain whatever is already buffered so it lands in one publication.
            let mut pending = vec![first];
            while pending.len() < self.max_batch && pending.last().is_some_and(|r| r.is_ok()) {
                match frames.next().now_or_never() {
                    Some(Some(item)) => pending.push(item),
                    _ => break,
                }
            }

            for item in pending {
                let err = match item {
                    Ok(frame) => self.handle(&frame, &mut batch),
                    Err(err) => Some(err),
                };
                if let Some(err) = err {
                    self.flush(&mut batch);
                    return ConnectionEnd::Failed {
                        err,
                        progressed: self.progressed(opened_at),
                    };
                }
            }
            self.flush(&mut batch);
        }
    }

    fn progressed(&self, opened_at: Instant) -> bool {
        self.delivered || opened_at.elapsed() >= self.backoff.policy().max
    }

    async fn open(&self) -> Result<FrameStream, SourceError> {
        let token = self.tokens.token().await?;
        self.source.connect(token.as_deref()).await
    }

    /// Route one frame. Returns `Some` when the connection must end.
    fn handle(&mut self, frame: &SseFrame, batch: &mut Vec<Mutation>) -> Option<SourceError> {
        self.shared.stats.event();
        let event = match event::decode(frame) {
            Ok(event) => event,
            Err(DecodeError::UnknownEvent { event }) => {
                debug!(loader = %self.name, event = %event, "ignoring unknown event");
                self.shared.stats.ignored();
                return None;
            }
            Err(err) => {
                warn!(loader = %self.name, error = %err, "dropping malformed event");
                self.shared.stats.malformed();
                return None;
            }
        };

        if !matches!(event, StreamEvent::Heartbeat | StreamEvent::Error { .. }) {
            self.delivered = true;
        }
        match event {
            StreamEvent::Upsert(record) => {
                self.seen.insert(record.id.clone());
                batch.push(Mutation::Upsert(record));
                self.shared.tracker.record_received();
            }
            StreamEvent::Delete { id } => {
                self.seen.remove(&id);
                batch.push(Mutation::Remove(id));
            }
            StreamEvent::Progress { count, total } => {
                if let Some(total) = total {
                    self.shared.tracker.set_expected_total(total);
                }
                self.shared.tracker.observe_count(count);
            }
            StreamEvent::Heartbeat => {}
            StreamEvent::Complete => {
                self.flush(batch);
                let swept = self.shared.store.retain_ids(&self.seen);
                if swept > 0 {
                    info!(loader = %self.name, swept, "removed records absent from resync");
                    self.shared.stats.swept(swept);
                }
                self.shared.tracker.mark_complete();
                self.shared.gate.signal(GateSignal::Completed);
                info!(
                    loader = %self.name,
                    records = self.shared.store.size(),
                    "initial load complete"
                );
            }
            StreamEvent::Error { reason } => {
                return Some(SourceError::Upstream(reason));
            }
        }
        None
    }

    fn flush(&self, batch: &mut Vec<Mutation>) {
        if batch.is_empty() {
            return;
        }
        let n = batch.len();
        let outcome = self.shared.store.apply(batch.drain(..));
        self.shared.stats.applied(n);
        debug!(
            loader = %self.name,
            inserted = outcome.inserted,
            replaced = outcome.replaced,
            removed = outcome.removed,
            "batch applied"
        );
    }
}

/// Resolves once shutdown is requested or the sender is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}
