//! Scripted upstream for driving the loader without a network.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;

use casestats_loader::{
    BackoffPolicy, CaseLoader, EventSource, FrameStream, LoaderOptions, SourceError, SseFrame,
    StaticToken, TokenProvider,
};

type Item = Result<SseFrame, SourceError>;

enum Scripted {
    Open(mpsc::UnboundedReceiver<Item>),
    Fail(SourceError),
    Stall,
}

/// Each `connect` consumes the next scripted connection. When the script is
/// exhausted, `connect` never resolves, like an unreachable upstream.
#[derive(Default)]
pub struct FakeSource {
    script: Mutex<VecDeque<Scripted>>,
    tokens: Mutex<Vec<Option<String>>>,
    connects: AtomicUsize,
    connected_at: Mutex<Vec<Instant>>,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script a connection that opens; events are pushed through the handle.
    pub fn connection(&self) -> Conn {
        let (tx, rx) = mpsc::unbounded_channel();
        self.script.lock().unwrap().push_back(Scripted::Open(rx));
        Conn { tx }
    }

    /// Script a connection attempt that fails.
    pub fn fail(&self, err: SourceError) {
        self.script.lock().unwrap().push_back(Scripted::Fail(err));
    }

    /// Script a connection attempt that never answers.
    pub fn stall(&self) {
        self.script.lock().unwrap().push_back(Scripted::Stall);
    }

    /// When each `connect` call happened, on the tokio clock.
    pub fn connect_times(&self) -> Vec<Instant> {
        self.connected_at.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn tokens(&self) -> Vec<Option<String>> {
        self.tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSource for FakeSource {
    async fn connect(&self, token: Option<&str>) -> Result<FrameStream, SourceError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connected_at.lock().unwrap().push(Instant::now());
        self.tokens.lock().unwrap().push(token.map(String::from));
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Open(rx)) => Ok(stream::unfold(rx, |mut rx| async move {
                let item = rx.recv().await?;
                Some((item, rx))
            })
            .boxed()),
            Some(Scripted::Fail(err)) => Err(err),
            Some(Scripted::Stall) | None => futures::future::pending().await,
        }
    }

    fn describe(&self) -> String {
        "fake://cases".to_string()
    }
}

/// Sending half of one scripted connection. Dropping it closes the stream.
pub struct Conn {
    tx: mpsc::UnboundedSender<Item>,
}

impl Conn {
    pub fn raw(&self, event: &str, data: &str) -> &Self {
        let _ = self.tx.send(Ok(SseFrame::new(event, data)));
        self
    }

    pub fn upsert(&self, id: &str, age: u32) -> &Self {
        self.raw("upsert", &format!(r#"{{"id":"{id}","age_days":{age}}}"#))
    }

    pub fn delete(&self, id: &str) -> &Self {
        self.raw("delete", &format!(r#"{{"id":"{id}"}}"#))
    }

    pub fn progress(&self, count: u64, total: u64) -> &Self {
        self.raw("progress", &format!(r#"{{"count":{count},"total":{total}}}"#))
    }

    pub fn heartbeat(&self) -> &Self {
        self.raw("heartbeat", "")
    }

    pub fn complete(&self) -> &Self {
        self.raw("complete", "{}")
    }

    pub fn error(&self, reason: &str) -> &Self {
        self.raw("error", &format!(r#"{{"reason":"{reason}"}}"#))
    }

    pub fn fail(&self, err: SourceError) {
        let _ = self.tx.send(Err(err));
    }

    pub fn close(self) {}
}

/// Hands out a different token each time and counts invalidations.
#[derive(Default)]
pub struct RotatingTokens {
    issued: AtomicUsize,
    invalidated: AtomicUsize,
}

impl RotatingTokens {
    pub fn invalidations(&self) -> usize {
        self.invalidated.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for RotatingTokens {
    async fn token(&self) -> Result<Option<String>, SourceError> {
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        Ok(Some(format!("tok-{n}")))
    }

    async fn invalidate(&self) {
        self.invalidated.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn options() -> LoaderOptions {
    LoaderOptions {
        name: "test".to_string(),
        backoff: BackoffPolicy {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 0.0,
        },
        connect_timeout: Duration::from_secs(10),
        inactivity_timeout: Duration::from_secs(60),
        progress_buffer: 64,
        max_batch: 8,
    }
}

pub fn loader(source: &Arc<FakeSource>) -> Arc<CaseLoader> {
    loader_with(source, options())
}

pub fn loader_with(source: &Arc<FakeSource>, options: LoaderOptions) -> Arc<CaseLoader> {
    CaseLoader::new(source.clone(), Arc::new(StaticToken::new("test-token")), options)
}

/// Poll `cond` on the (usually paused) clock until it holds.
pub async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

pub fn ids(loader: &CaseLoader) -> Vec<String> {
    loader.records().iter().map(|r| r.id.clone()).collect()
}
