//! Streaming case-data loader.
//!
//! Keeps a complete, queryable snapshot of every in-flight case by following
//! the upstream case-management event stream, reports load progress to any
//! number of subscribers and gates readiness on the first complete load.

pub mod auth;
pub mod backoff;
pub mod broadcaster;
pub mod codec;
pub mod error;
pub mod event;
pub mod facade;
mod ingestor;
pub mod progress;
pub mod readiness;
pub mod source;
pub mod stats;
pub mod store;

pub use auth::{ClientCredentials, NoAuth, StaticToken, TokenProvider};
pub use backoff::{Backoff, BackoffPolicy, RetryClass};
pub use broadcaster::{ProgressBroadcaster, ProgressSubscription, SubscriptionId};
pub use error::{LoaderError, SourceError};
pub use event::{SseFrame, StreamEvent};
pub use facade::{CaseLoader, LoaderOptions};
pub use progress::{ProgressListener, ProgressState, ProgressTracker};
pub use readiness::{Readiness, ReadinessGate};
pub use source::{EventSource, FrameStream, HttpEventSource};
pub use stats::StatsSnapshot;
pub use store::{Snapshot, SnapshotStore};
