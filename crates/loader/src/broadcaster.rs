//! Fan-out of progress states to any number of subscribers.
//!
//! Each subscriber owns a bounded queue. Publishing never waits: when a
//! subscriber falls behind, its oldest queued state is discarded so the most
//! recent one is always delivered. A new subscriber starts with the current
//! state already queued.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::debug;

use crate::progress::{ProgressListener, ProgressState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Mailbox {
    queue: Mutex<VecDeque<ProgressState>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl Mailbox {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    fn push(&self, state: ProgressState) {
        {
            let mut q = lock(&self.queue);
            if q.len() >= self.capacity {
                q.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            q.push_back(state);
        }
        self.notify.notify_one();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        lock(&self.queue).clear();
        self.notify.notify_one();
    }
}

struct Registry {
    mailboxes: HashMap<SubscriptionId, Arc<Mailbox>>,
    last: ProgressState,
    closed: bool,
}

struct Shared {
    registry: Mutex<Registry>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Shared {
    fn remove(&self, id: SubscriptionId) -> bool {
        let removed = lock(&self.registry).mailboxes.remove(&id);
        match removed {
            Some(mailbox) => {
                mailbox.close();
                debug!(subscription = %id, "progress subscriber removed");
                true
            }
            None => false,
        }
    }
}

#[derive(Clone)]
pub struct ProgressBroadcaster {
    shared: Arc<Shared>,
}

impl ProgressBroadcaster {
    /// `capacity` is the per-subscriber queue bound (at least 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry {
                    mailboxes: HashMap::new(),
                    last: ProgressState::default(),
                    closed: false,
                }),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
            }),
        }
    }

    pub fn subscribe(&self) -> ProgressSubscription {
        let id = SubscriptionId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let mailbox = Arc::new(Mailbox::new(self.shared.capacity));
        {
            let mut reg = lock(&self.shared.registry);
            if reg.closed {
                mailbox.close();
            } else {
                mailbox.push(reg.last);
                reg.mailboxes.insert(id, mailbox.clone());
            }
        }
        debug!(subscription = %id, "progress subscriber added");
        ProgressSubscription {
            id,
            mailbox,
            owner: Arc::downgrade(&self.shared),
        }
    }

    /// Remove a subscriber by id. Its pending `recv` resolves to `None`.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.remove(id)
    }

    pub fn publish(&self, state: ProgressState) {
        let mailboxes: Vec<Arc<Mailbox>> = {
            let mut reg = lock(&self.shared.registry);
            if reg.closed {
                return;
            }
            reg.last = state;
            reg.mailboxes.values().cloned().collect()
        };
        for mailbox in mailboxes {
            mailbox.push(state);
        }
    }

    /// Most recently published state.
    pub fn latest(&self) -> ProgressState {
        lock(&self.shared.registry).last
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.shared.registry).mailboxes.len()
    }

    /// Wake every subscriber with end-of-stream and refuse further publishes.
    pub fn close(&self) {
        let mailboxes: Vec<Arc<Mailbox>> = {
            let mut reg = lock(&self.shared.registry);
            reg.closed = true;
            reg.mailboxes.drain().map(|(_, m)| m).collect()
        };
        for mailbox in mailboxes {
            mailbox.close();
        }
    }
}

impl ProgressListener for ProgressBroadcaster {
    fn on_progress(&self, state: &ProgressState) {
        self.publish(*state);
    }
}

/// Receiving end of one subscription. Dropping it unsubscribes.
pub struct ProgressSubscription {
    id: SubscriptionId,
    mailbox: Arc<Mailbox>,
    owner: Weak<Shared>,
}

impl ProgressSubscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next state, or `None` once the subscription or broadcaster is closed.
    pub async fn recv(&mut self) -> Option<ProgressState> {
        loop {
            if let Some(state) = self.try_recv() {
                return Some(state);
            }
            if self.mailbox.closed.load(Ordering::Acquire) {
                return None;
            }
            self.mailbox.notify.notified().await;
        }
    }

    pub fn try_recv(&mut self) -> Option<ProgressState> {
        lock(&self.mailbox.queue).pop_front()
    }

    /// States discarded because this subscriber fell behind.
    pub fn dropped(&self) -> u64 {
        self.mailbox.dropped.load(Ordering::Relaxed)
    }

    pub fn into_stream(self) -> BoxStream<'static, ProgressState> {
        stream::unfold(self, |mut sub| async move {
            let state = sub.recv().await?;
            Some((state, sub))
        })
        .boxed()
    }
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        if let Some(shared) = self.owner.upgrade() {
            shared.remove(self.id);
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
