//! Inbound firehose: event shape, filtering and the websocket listener.
//!
//! Only `{commit: {record: {text, langs?}}}` matters; every other field and
//! every other event kind (identity, account, deletes) is ignored.

pub mod filter;
pub mod listener;

use crate::error::{PipelineError, Result};
use serde::Deserialize;

pub use filter::{DropReason, FeedFilter, FilterDecision};
pub use listener::{FeedListener, ListenerExit};

/// A parsed firehose message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedEvent {
    /// Repository commit, absent for non-commit events.
    #[serde(default)]
    pub commit: Option<Commit>,
}

/// Commit payload of a firehose event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Commit {
    /// Created or updated record, absent for deletes.
    #[serde(default)]
    pub record: Option<Record>,
}

/// The post record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Record {
    /// Post text.
    #[serde(default)]
    pub text: Option<String>,
    /// Declared language tags, e.g. `["en", "ja"]`.
    #[serde(default)]
    pub langs: Option<Vec<String>>,
}

impl FeedEvent {
    /// Parse one text frame.
    ///
    /// # Errors
    ///
    /// [`PipelineError::MalformedEvent`] when the frame is not JSON of the
    /// expected shape.
    pub fn parse(frame: &str) -> Result<Self> {
        serde_json::from_str(frame).map_err(|e| PipelineError::MalformedEvent(e.to_string()))
    }

    /// The record, if this event carries one.
    pub fn record(&self) -> Option<&Record> {
        self.commit.as_ref().and_then(|c| c.record.as_ref())
    }
}
