//! Per-participant conversation buffers.
//!
//! A [`ConversationBuffer`] is the ordered context sent to the completion
//! API on every cycle: the seed prompt first, then inbound posts and replies
//! in the order they were appended. [`ConversationStore`] owns one buffer per
//! participant together with that participant's voice.
//!
//! By default buffers grow without bound. With a non-zero cap the oldest
//! fragment after the seed is evicted first; the seed prompt is pinned.

use crate::error::{PipelineError, Result};
use std::collections::{BTreeMap, VecDeque};

/// Ordered text fragments for one participant.
#[derive(Debug, Clone, Default)]
pub struct ConversationBuffer {
    /// Seed prompt, always sent first. Empty seeds are not sent.
    seed: String,
    /// Fragments appended after the seed (oldest first).
    fragments: VecDeque<String>,
    /// Maximum fragments kept after the seed. `0` means unbounded.
    max_fragments: usize,
}

impl ConversationBuffer {
    /// Create a buffer seeded with `seed`.
    #[must_use]
    pub fn new(seed: impl Into<String>, max_fragments: usize) -> Self {
        Self {
            seed: seed.into(),
            fragments: VecDeque::new(),
            max_fragments,
        }
    }

    /// Append one fragment at the end, evicting the oldest if at capacity.
    pub fn append(&mut self, fragment: impl Into<String>) {
        if self.max_fragments > 0 && self.fragments.len() >= self.max_fragments {
            self.fragments.pop_front();
        }
        self.fragments.push_back(fragment.into());
    }

    /// Full ordered sequence for the next completion request.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        let mut parts = Vec::with_capacity(self.fragments.len() + 1);
        if !self.seed.is_empty() {
            parts.push(self.seed.clone());
        }
        parts.extend(self.fragments.iter().cloned());
        parts
    }

    /// Fragments appended after the seed, oldest first.
    #[must_use]
    pub fn fragments(&self) -> Vec<String> {
        self.fragments.iter().cloned().collect()
    }

    /// The seed prompt.
    #[must_use]
    pub fn seed(&self) -> &str {
        &self.seed
    }

    /// Number of fragments after the seed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    /// Whether nothing has been appended yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

/// A configured speaker with its own voice and history.
#[derive(Debug, Clone)]
pub struct Participant {
    /// Voice model handed to the synthesizer.
    pub voice: String,
    /// Running conversation.
    pub buffer: ConversationBuffer,
}

/// Owns every participant's buffer. The key set is fixed after construction.
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    participants: BTreeMap<String, Participant>,
}

impl ConversationStore {
    /// Build a store from `(id, participant)` pairs.
    pub fn new(participants: impl IntoIterator<Item = (String, Participant)>) -> Self {
        Self {
            participants: participants.into_iter().collect(),
        }
    }

    /// Participant ids in stable (sorted) order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.participants.keys().cloned().collect()
    }

    /// Number of participants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Whether no participant is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Look up a participant.
    pub fn get(&self, id: &str) -> Result<&Participant> {
        self.participants
            .get(id)
            .ok_or_else(|| PipelineError::UnknownParticipant(id.to_owned()))
    }

    /// Look up a participant mutably.
    pub fn get_mut(&mut self, id: &str) -> Result<&mut Participant> {
        self.participants
            .get_mut(id)
            .ok_or_else(|| PipelineError::UnknownParticipant(id.to_owned()))
    }
}
