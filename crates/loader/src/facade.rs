//! The one entry point the rest of the process uses.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use casestats_core::{Config, Record};

use crate::auth::{self, TokenProvider};
use crate::backoff::{Backoff, BackoffPolicy};
use crate::broadcaster::{ProgressBroadcaster, ProgressSubscription, SubscriptionId};
use crate::error::{LoaderError, SourceError};
use crate::ingestor::{Ingestor, Shared};
use crate::progress::{ProgressState, ProgressTracker};
use crate::readiness::{Readiness, ReadinessGate};
use crate::source::{EventSource, HttpEventSource};
use crate::stats::{IngestStats, StatsSnapshot};
use crate::store::{Snapshot, SnapshotStore};

#[derive(Debug, Clone)]
pub struct LoaderOptions {
    pub name: String,
    pub backoff: BackoffPolicy,
    /// Budget for the TCP handshake. Opening the stream, token exchange
    /// included, gets this plus the inactivity window.
    pub connect_timeout: Duration,
    pub inactivity_timeout: Duration,
    pub progress_buffer: usize,
    pub max_batch: usize,
}

impl LoaderOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            name: config.loader.name.clone(),
            backoff: BackoffPolicy::from(&config.backoff),
            connect_timeout: config.upstream.connect_timeout(),
            inactivity_timeout: config.upstream.inactivity_timeout(),
            progress_buffer: config.loader.progress_buffer,
            max_batch: config.loader.max_batch,
        }
    }
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            name: "cases".to_string(),
            backoff: BackoffPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            inactivity_timeout: Duration::from_secs(45),
            progress_buffer: 16,
            max_batch: 512,
        }
    }
}

/// Owns the snapshot, progress and readiness state and the task that feeds
/// them. Request handlers only ever read through this type.
pub struct CaseLoader {
    options: LoaderOptions,
    source: Arc<dyn EventSource>,
    tokens: Arc<dyn TokenProvider>,
    store: Arc<SnapshotStore>,
    tracker: Arc<ProgressTracker>,
    gate: Arc<ReadinessGate>,
    stats: Arc<IngestStats>,
    broadcaster: ProgressBroadcaster,
    shutdown_tx: watch::Sender<bool>,
    attempted_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CaseLoader {
    pub fn new(
        source: Arc<dyn EventSource>,
        tokens: Arc<dyn TokenProvider>,
        options: LoaderOptions,
    ) -> Arc<Self> {
        let tracker = Arc::new(ProgressTracker::new());
        let broadcaster = ProgressBroadcaster::new(options.progress_buffer);
        tracker.add_listener(Arc::new(broadcaster.clone()));

        Arc::new(Self {
            options,
            source,
            tokens,
            store: Arc::new(SnapshotStore::new()),
            tracker,
            gate: Arc::new(ReadinessGate::new()),
            stats: Arc::new(IngestStats::new()),
            broadcaster,
            shutdown_tx: watch::channel(false).0,
            attempted_tx: watch::channel(false).0,
            task: Mutex::new(None),
        })
    }

    /// Wire the HTTP stream and token provider described by `config`.
    pub fn from_config(config: &Config) -> Result<Arc<Self>, SourceError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.upstream.connect_timeout())
            .read_timeout(config.upstream.inactivity_timeout())
            .build()
            .map_err(|e| SourceError::Transport(e.to_string()))?;
        let source = HttpEventSource::new(http.clone(), &config.upstream.stream_url())?;
        let tokens: Arc<dyn TokenProvider> = Arc::from(auth::from_config(&config.auth, http));
        Ok(Self::new(Arc::new(source), tokens, LoaderOptions::from_config(config)))
    }

    pub fn name(&self) -> &str {
        &self.options.name
    }

    /// Start the ingestor and wait until its first connection attempt has
    /// either connected or failed. Calling it again only waits.
    pub async fn init(&self) -> Result<(), LoaderError> {
        if *self.shutdown_tx.borrow() {
            return Err(LoaderError::ShutDown);
        }
        let mut attempted = self.attempted_tx.subscribe();
        {
            let mut task = lock(&self.task);
            if task.is_none() {
                let ingestor = Ingestor::new(
                    self.options.name.clone(),
                    self.source.clone(),
                    self.tokens.clone(),
                    Shared {
                        store: self.store.clone(),
                        tracker: self.tracker.clone(),
                        gate: self.gate.clone(),
                        stats: self.stats.clone(),
                    },
                    Backoff::new(self.options.backoff.clone()),
                    self.options.connect_timeout + self.options.inactivity_timeout,
                    self.options.inactivity_timeout,
                    self.options.max_batch,
                    self.shutdown_tx.subscribe(),
                    self.attempted_tx.clone(),
                );
                *task = Some(tokio::spawn(ingestor.run()));
                info!(loader = %self.options.name, "loader initialized");
            }
        }
        attempted
            .wait_for(|done| *done)
            .await
            .map(|_| ())
            .map_err(|_| LoaderError::ShutDown)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot()
    }

    /// Every known record, ordered by identity. Usable in any readiness state.
    pub fn records(&self) -> Vec<Arc<Record>> {
        self.store.snapshot().to_vec()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Record>> {
        self.store.get(id)
    }

    pub fn len(&self) -> usize {
        self.store.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn readiness(&self) -> Readiness {
        self.gate.state()
    }

    pub fn is_ready(&self) -> bool {
        self.gate.is_ready()
    }

    /// Readiness-probe answer: false only before the first load completes.
    pub fn probe_ok(&self) -> bool {
        self.gate.probe_ok()
    }

    pub fn readiness_changes(&self) -> watch::Receiver<Readiness> {
        self.gate.subscribe()
    }

    /// Wait for `Ready` with no timeout of its own. Returns
    /// [`LoaderError::ShutDown`] if the loader is shut down first.
    pub async fn wait_until_ready(&self) -> Result<(), LoaderError> {
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::select! {
            r = self.gate.wait_until_ready() => r,
            _ = shutdown.wait_for(|stop| *stop) => Err(LoaderError::ShutDown),
        }
    }

    pub fn progress(&self) -> ProgressState {
        self.tracker.current_state()
    }

    pub fn subscribe_progress(&self) -> ProgressSubscription {
        self.broadcaster.subscribe()
    }

    pub fn unsubscribe_progress(&self, id: SubscriptionId) -> bool {
        self.broadcaster.unsubscribe(id)
    }

    pub fn progress_subscribers(&self) -> usize {
        self.broadcaster.subscriber_count()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn upstream(&self) -> String {
        self.source.describe()
    }

    /// Stop the ingestor, closing the upstream connection and any pending
    /// backoff, and end every progress subscription.
    pub async fn shutdown(&self) -> Result<(), LoaderError> {
        self.shutdown_tx.send_replace(true);
        self.broadcaster.close();
        let task = lock(&self.task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(loader = %self.options.name, error = %e, "ingestor task ended abnormally");
                return Err(LoaderError::Task(e.to_string()));
            }
        }
        info!(loader = %self.options.name, "loader shut down");
        Ok(())
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
