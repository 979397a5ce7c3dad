//! Serialized request pipeline.
//!
//! One cycle takes the lock gate, extends the participant's conversation
//! with the inbound post, asks the completion backend for a reply, stores
//! the cleaned reply, and has it synthesized and played. The gate guard is
//! held for the whole cycle and dropped on every exit path, so a failing
//! request or subprocess never leaves the gate closed.
//!
//! When a completion fails the wrapped inbound post stays in the buffer;
//! the next cycle for that participant sends it again as context.

pub mod messages;

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::conversation::ConversationStore;
use crate::error::Result;
use crate::llm::CompletionClient;
use crate::lock::LockGate;
use crate::speech::SpeechSynthesizer;
use crate::text::{strip_emphasis, wrap_inbound};

pub use messages::CycleOutcome;

/// Runs synthesize-and-speak cycles one at a time.
pub struct RequestPipeline {
    gate: LockGate,
    completion: Arc<dyn CompletionClient>,
    speech: Arc<dyn SpeechSynthesizer>,
    store: Mutex<ConversationStore>,
    echo_inbound: bool,
}

impl std::fmt::Debug for RequestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPipeline")
            .field("gate", &self.gate.path())
            .field("completion", &self.completion.name())
            .field("echo_inbound", &self.echo_inbound)
            .finish_non_exhaustive()
    }
}

impl RequestPipeline {
    /// Pipeline over `store`, serialized by `gate`. Inbound echo starts off.
    pub fn new(
        gate: LockGate,
        completion: Arc<dyn CompletionClient>,
        speech: Arc<dyn SpeechSynthesizer>,
        store: ConversationStore,
    ) -> Self {
        Self {
            gate,
            completion,
            speech,
            store: Mutex::new(store),
            echo_inbound: false,
        }
    }

    /// Re-append the wrapped inbound post after each reply.
    ///
    /// The rotating variant does this so every participant's history reads
    /// post, reply, post.
    pub fn with_echo_inbound(mut self, echo: bool) -> Self {
        self.echo_inbound = echo;
        self
    }

    /// Participant ids in stable order.
    pub async fn participants(&self) -> Vec<String> {
        self.store.lock().await.ids()
    }

    /// Copy of a participant's full context as the next request would send it.
    pub async fn snapshot(&self, participant: &str) -> Result<Vec<String>> {
        Ok(self.store.lock().await.get(participant)?.buffer.snapshot())
    }

    /// Fragments appended after a participant's seed prompt.
    pub async fn history(&self, participant: &str) -> Result<Vec<String>> {
        Ok(self.store.lock().await.get(participant)?.buffer.fragments())
    }

    /// Run one full cycle for `participant`.
    ///
    /// With `inbound = None` only the existing context is sent, which is how
    /// the seed prompt gets spoken at startup.
    ///
    /// # Errors
    ///
    /// Unknown participant, lock timeout, completion failure (after
    /// retries), or synthesis/playback failure. The gate is released in
    /// every case.
    pub async fn run_cycle(&self, participant: &str, inbound: Option<&str>) -> Result<CycleOutcome> {
        // Fail before waiting on the gate.
        self.store.lock().await.get(participant)?;

        let _guard = self.gate.acquire().await?;
        tracing::debug!(participant, "lock gate acquired");

        let wrapped = inbound.map(wrap_inbound);
        let (parts, voice) = {
            let mut store = self.store.lock().await;
            let entry = store.get_mut(participant)?;
            if let Some(wrapped) = &wrapped {
                entry.buffer.append(wrapped.clone());
            }
            (entry.buffer.snapshot(), entry.voice.clone())
        };

        let raw = self.completion.complete(&parts).await?;
        let reply = strip_emphasis(&raw);

        {
            let mut store = self.store.lock().await;
            let entry = store.get_mut(participant)?;
            entry.buffer.append(reply.clone());
            if self.echo_inbound
                && let Some(wrapped) = wrapped
            {
                entry.buffer.append(wrapped);
            }
        }

        if reply.trim().is_empty() {
            tracing::warn!(participant, "blank reply, nothing to speak");
            return Ok(CycleOutcome {
                participant: participant.to_owned(),
                reply,
                audio_path: None,
            });
        }

        tracing::info!(participant, reply = %reply, "reply received");
        let audio = self.speech.speak(&voice, &reply).await?;
        tracing::info!(participant, audio = %audio.display(), "reply spoken");

        Ok(CycleOutcome {
            participant: participant.to_owned(),
            reply,
            audio_path: Some(audio),
        })
    }

    /// Speak every participant's seed prompt once, in id order.
    ///
    /// Failures are logged per participant and do not stop the others.
    /// Returns the number of participants primed successfully.
    pub async fn prime(&self) -> usize {
        let mut primed = 0;
        for id in self.participants().await {
            match self.run_cycle(&id, None).await {
                Ok(_) => primed += 1,
                Err(e) => tracing::warn!(participant = %id, "priming failed: {e}"),
            }
        }
        primed
    }
}
