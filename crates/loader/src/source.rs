//! Upstream connection: opens the stream and yields raw SSE frames.

use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::header::{ACCEPT, AUTHORIZATION, CACHE_CONTROL};
use reqwest::StatusCode;
use tracing::debug;
use url::Url;

use crate::error::SourceError;
use crate::event::{SseDecoder, SseFrame};

/// Frames of one live connection. The stream ends when the upstream closes it.
pub type FrameStream = BoxStream<'static, Result<SseFrame, SourceError>>;

/// Something the ingestor can (re)connect to.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Open a new connection. Errors here count as a failed attempt.
    async fn connect(&self, token: Option<&str>) -> Result<FrameStream, SourceError>;

    /// Human-readable target for logs.
    fn describe(&self) -> String;
}

/// `text/event-stream` over HTTP.
pub struct HttpEventSource {
    http: reqwest::Client,
    url: Url,
}

impl HttpEventSource {
    pub fn new(http: reqwest::Client, url: &str) -> Result<Self, SourceError> {
        let url = Url::parse(url).map_err(|e| SourceError::Transport(format!("invalid stream url {url}: {e}")))?;
        Ok(Self { http, url })
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    async fn connect(&self, token: Option<&str>) -> Result<FrameStream, SourceError> {
        let mut req = self
            .http
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(token) = token {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let resp = req.send().await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(SourceError::Unauthorized {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                status: status.as_u16(),
                body: body.chars().take(256).collect(),
            });
        }

        debug!(url = %self.url, "event stream opened");
        Ok(frames(resp.bytes_stream().boxed()))
    }

    fn describe(&self) -> String {
        self.url.to_string()
    }
}

struct FrameState {
    bytes: BoxStream<'static, Result<Bytes, reqwest::Error>>,
    decoder: SseDecoder,
    pending: VecDeque<SseFrame>,
    done: bool,
}

/// Turn a chunked body into complete frames. A trailing frame without its
/// blank-line terminator is still delivered when the body ends.
fn frames(bytes: BoxStream<'static, Result<Bytes, reqwest::Error>>) -> FrameStream {
    let state = FrameState {
        bytes,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(frame) = st.pending.pop_front() {
                return Some((Ok(frame), st));
            }
            if st.done {
                return None;
            }
            match st.bytes.next().await {
                Some(Ok(chunk)) => st.pending.extend(st.decoder.push(&chunk)),
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(SourceError::from(e)), st));
                }
                None => {
                    st.done = true;
                    st.pending.extend(st.decoder.finish());
                }
            }
        }
    })
    .boxed()
}
