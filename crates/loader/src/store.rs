//! Identity-keyed snapshot of all known cases.
//!
//! The store publishes immutable maps through an [`ArcSwap`]. The ingestor is
//! the only writer: it derives the next map from the current one and swaps it
//! in atomically. Readers take an `Arc` to whichever map is current and can
//! iterate it for as long as they like without blocking the writer or seeing a
//! half-applied batch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;

use casestats_core::Record;

type RecordMap = HashMap<String, Arc<Record>>;

/// One pending change to the store.
#[derive(Debug, Clone)]
pub enum Mutation {
    Upsert(Record),
    Remove(String),
}

/// Immutable, cheaply clonable view of the store at one point in time.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    records: Arc<RecordMap>,
}

impl Snapshot {
    pub fn get(&self, id: &str) -> Option<&Arc<Record>> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Record>> {
        self.records.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// All records, sorted by identity so callers get a stable order.
    pub fn to_vec(&self) -> Vec<Arc<Record>> {
        let mut records: Vec<Arc<Record>> = self.records.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }
}

/// Outcome of applying a batch, for logging and stats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub inserted: usize,
    pub replaced: usize,
    pub removed: usize,
}

pub struct SnapshotStore {
    current: ArcSwap<RecordMap>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            records: self.current.load_full(),
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Record>> {
        self.current.load().get(id).cloned()
    }

    pub fn size(&self) -> usize {
        self.current.load().len()
    }

    /// Insert or replace the entry for `record.id`.
    pub fn upsert(&self, record: Record) {
        self.apply([Mutation::Upsert(record)]);
    }

    /// Remove `id` if present.
    pub fn remove(&self, id: &str) -> bool {
        self.apply([Mutation::Remove(id.to_string())]).removed == 1
    }

    /// Apply every mutation in order and publish the result once.
    pub fn apply(&self, batch: impl IntoIterator<Item = Mutation>) -> BatchOutcome {
        let mut next: RecordMap = (**self.current.load()).clone();
        let mut outcome = BatchOutcome::default();

        for mutation in batch {
            match mutation {
                Mutation::Upsert(record) => {
                    let id = record.id.clone();
                    if next.insert(id, Arc::new(record)).is_some() {
                        outcome.replaced += 1;
                    } else {
                        outcome.inserted += 1;
                    }
                }
                Mutation::Remove(id) => {
                    if next.remove(&id).is_some() {
                        outcome.removed += 1;
                    }
                }
            }
        }

        if outcome != BatchOutcome::default() {
            self.current.store(Arc::new(next));
        }
        outcome
    }

    /// Drop every record whose identity is not in `keep`. Returns how many were removed.
    pub fn retain_ids(&self, keep: &HashSet<String>) -> usize {
        let current = self.current.load_full();
        let stale = current.keys().filter(|id| !keep.contains(*id)).count();
        if stale == 0 {
            return 0;
        }
        let next: RecordMap = current
            .iter()
            .filter(|(id, _)| keep.contains(*id))
            .map(|(id, r)| (id.clone(), r.clone()))
            .collect();
        self.current.store(Arc::new(next));
        stale
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}
