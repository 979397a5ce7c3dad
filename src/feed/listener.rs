//! Websocket feed listener.
//!
//! Holds one long-lived connection, parses every text frame as a
//! [`FeedEvent`], runs it through the [`FeedFilter`] and hands passing posts
//! to the pipeline worker over a bounded queue. Malformed frames are dropped.
//! When the queue is full the newest post is dropped so a burst cannot grow
//! memory without bound.
//!
//! Without `reconnect`, a failed connection is logged and the listener
//! stops. With it, the listener reconnects with capped exponential backoff.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::{FeedEvent, FeedFilter, FilterDecision};
use crate::error::{PipelineError, Result};

/// Initial reconnect delay.
const BASE_RECONNECT_DELAY: Duration = Duration::from_secs(1);
/// Reconnect delay ceiling.
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Why the listener returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerExit {
    /// The server closed the connection and reconnect is off.
    Closed,
    /// Shutdown was requested.
    Cancelled,
    /// The pipeline worker stopped taking posts.
    WorkerGone,
}

/// What happened to one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FrameOutcome {
    Queued,
    Filtered,
    Malformed,
    QueueFull,
    WorkerGone,
}

/// Long-lived websocket consumer.
#[derive(Debug, Clone)]
pub struct FeedListener {
    url: String,
    filter: FeedFilter,
    reconnect: bool,
}

impl FeedListener {
    /// Listener for `url` applying `filter`, without reconnect.
    pub fn new(url: impl Into<String>, filter: FeedFilter) -> Self {
        Self {
            url: url.into(),
            filter,
            reconnect: false,
        }
    }

    /// Enable or disable reconnect with backoff.
    pub fn with_reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Run until the connection ends, shutdown is requested, or the worker
    /// side of `posts` is dropped.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Feed`] when a connection attempt or read fails and
    /// reconnect is disabled.
    pub async fn run(
        &self,
        posts: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<ListenerExit> {
        let mut attempt: u32 = 0;

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => return Ok(ListenerExit::Cancelled),
                result = self.connect_once(&posts, &mut attempt) => result,
            };

            match result {
                Ok(ListenerExit::Closed) if self.reconnect => {
                    tracing::warn!(url = %self.url, "feed connection closed, reconnecting");
                }
                Ok(exit) => return Ok(exit),
                Err(e) if self.reconnect => {
                    tracing::warn!(url = %self.url, attempt, "feed connection failed: {e}");
                }
                Err(e) => {
                    tracing::error!(url = %self.url, "feed connection failed: {e}");
                    return Err(e);
                }
            }

            attempt = attempt.saturating_add(1);
            let delay = reconnect_delay(attempt);
            tokio::select! {
                _ = cancel.cancelled() => return Ok(ListenerExit::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One connection lifetime. Resets `attempt` once connected.
    async fn connect_once(
        &self,
        posts: &mpsc::Sender<String>,
        attempt: &mut u32,
    ) -> Result<ListenerExit> {
        let (mut ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| PipelineError::Feed(format!("connect: {e}")))?;
        tracing::info!(url = %self.url, "feed connected");
        *attempt = 0;

        loop {
            match ws_stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    if self.dispatch_frame(&text, posts) == FrameOutcome::WorkerGone {
                        return Ok(ListenerExit::WorkerGone);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(?frame, "feed closed by server");
                    return Ok(ListenerExit::Closed);
                }
                None => return Ok(ListenerExit::Closed),
                Some(Err(e)) => return Err(PipelineError::Feed(format!("read: {e}"))),
                _ => {} // Binary, Ping/Pong frames handled by tungstenite.
            }
        }
    }

    /// Parse, filter and enqueue one text frame.
    pub(crate) fn dispatch_frame(&self, frame: &str, posts: &mpsc::Sender<String>) -> FrameOutcome {
        let event = match FeedEvent::parse(frame) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!("discarding frame: {e}");
                return FrameOutcome::Malformed;
            }
        };

        let text = match self.filter.evaluate(&event) {
            FilterDecision::Pass(text) => text,
            FilterDecision::Drop(reason) => {
                tracing::trace!(?reason, "event filtered out");
                return FrameOutcome::Filtered;
            }
        };

        tracing::info!(post = %text, "post matched");
        match posts.try_send(text) {
            Ok(()) => FrameOutcome::Queued,
            Err(TrySendError::Full(_)) => {
                tracing::debug!("pipeline busy, dropping post");
                FrameOutcome::QueueFull
            }
            Err(TrySendError::Closed(_)) => FrameOutcome::WorkerGone,
        }
    }
}

fn reconnect_delay(attempt: u32) -> Duration {
    BASE_RECONNECT_DELAY
        .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1).min(5)))
        .min(MAX_RECONNECT_DELAY)
}
