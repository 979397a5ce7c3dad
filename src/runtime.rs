//! Process wiring: configuration → participants → pipeline worker → listener.
//!
//! The listener task parses and filters frames and pushes passing posts into
//! a bounded queue. A single worker task drains the queue, routes each post
//! to a participant and runs one pipeline cycle at a time. A failed cycle is
//! logged and the worker moves on to the next post.
//!
//! Shutdown is driven by a [`CancellationToken`]. When the listener stops on
//! its own (server closed the feed, or a connect failure without
//! reconnect), posts already queued are still processed before
//! [`FeedSpeakRuntime::run`] returns.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::FeedSpeakConfig;
use crate::error::Result;
use crate::feed::{FeedFilter, FeedListener, ListenerExit};
use crate::llm::{CompletionClient, GeminiClient};
use crate::lock::LockGate;
use crate::participants::load_store;
use crate::pipeline::RequestPipeline;
use crate::router::ParticipantRouter;
use crate::speech::{CommandSpeaker, SpeechSynthesizer};

/// Counters reported when the runtime stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Cycles that finished with audio played (or a blank reply).
    pub completed: usize,
    /// Cycles that returned an error.
    pub failed: usize,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Why the listener returned.
    pub listener: ListenerExit,
    /// Worker counters.
    pub stats: WorkerStats,
}

/// A fully wired feed-to-speech process.
pub struct FeedSpeakRuntime {
    pipeline: Arc<RequestPipeline>,
    router: ParticipantRouter,
    listener: FeedListener,
    queue_capacity: usize,
    prime_on_start: bool,
    cancel: CancellationToken,
}

impl std::fmt::Debug for FeedSpeakRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedSpeakRuntime")
            .field("pipeline", &self.pipeline)
            .field("listener", &self.listener)
            .field("queue_capacity", &self.queue_capacity)
            .finish_non_exhaustive()
    }
}

impl FeedSpeakRuntime {
    /// Build the production runtime: Gemini completions and subprocess speech.
    ///
    /// # Errors
    ///
    /// Configuration problems, unreadable prompts or roster, or a sound
    /// directory that cannot be created.
    pub fn from_config(config: &FeedSpeakConfig) -> Result<Self> {
        let completion: Arc<dyn CompletionClient> = Arc::new(GeminiClient::new(&config.llm)?);
        let speaker = CommandSpeaker::from_config(&config.speech);
        speaker.ensure_sound_dir()?;
        Self::with_backends(config, completion, Arc::new(speaker))
    }

    /// Build a runtime around caller-supplied backends.
    ///
    /// # Errors
    ///
    /// Invalid filter, unreadable prompts or roster.
    pub fn with_backends(
        config: &FeedSpeakConfig,
        completion: Arc<dyn CompletionClient>,
        speech: Arc<dyn SpeechSynthesizer>,
    ) -> Result<Self> {
        let filter = FeedFilter::from_config(&config.filter)?;
        let store = load_store(config)?;
        let router = ParticipantRouter::new(store.ids())?;
        let gate = LockGate::from_config(&config.lock);

        tracing::info!(
            participants = store.len(),
            rotating = config.is_rotating(),
            backend = completion.name(),
            "runtime configured"
        );

        let pipeline = RequestPipeline::new(gate, completion, speech, store)
            .with_echo_inbound(config.is_rotating());
        let listener =
            FeedListener::new(config.feed.url.clone(), filter).with_reconnect(config.feed.reconnect);

        Ok(Self {
            pipeline: Arc::new(pipeline),
            router,
            listener,
            queue_capacity: config.feed.queue_capacity.max(1),
            prime_on_start: config.pipeline.prime_on_start,
            cancel: CancellationToken::new(),
        })
    }

    /// Replace the participant router, e.g. with a seeded one.
    pub fn with_router(mut self, router: ParticipantRouter) -> Self {
        self.router = router;
        self
    }

    /// Token that stops the runtime when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Shared handle to the pipeline, for inspecting conversations.
    pub fn pipeline(&self) -> Arc<RequestPipeline> {
        Arc::clone(&self.pipeline)
    }

    /// Prime participants (if enabled), then listen until the feed ends or
    /// the runtime is cancelled. Cancelling during priming stops at once.
    ///
    /// # Errors
    ///
    /// Returns the listener's error when the feed fails without reconnect.
    /// Queued posts are processed first.
    pub async fn run(self) -> Result<RunSummary> {
        if self.prime_on_start {
            // Dropping an in-flight cycle releases the gate and kills its
            // subprocesses.
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("cancelled while priming");
                    return Ok(RunSummary {
                        listener: ListenerExit::Cancelled,
                        stats: WorkerStats::default(),
                    });
                }
                primed = self.pipeline.prime() => {
                    tracing::info!(primed, "seed prompts spoken");
                }
            }
        }

        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let worker = tokio::spawn(run_worker(
            Arc::clone(&self.pipeline),
            self.router,
            rx,
            self.cancel.clone(),
        ));

        tracing::info!("listening for posts");
        let listened = self.listener.run(tx, self.cancel.clone()).await;

        let stats = match worker.await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!("pipeline worker panicked: {e}");
                WorkerStats::default()
            }
        };
        tracing::info!(
            completed = stats.completed,
            failed = stats.failed,
            "runtime stopped"
        );

        let listener = listened?;
        Ok(RunSummary { listener, stats })
    }
}

/// Drain the queue one post at a time until it closes or `cancel` fires.
async fn run_worker(
    pipeline: Arc<RequestPipeline>,
    mut router: ParticipantRouter,
    mut posts: mpsc::Receiver<String>,
    cancel: CancellationToken,
) -> WorkerStats {
    let mut stats = WorkerStats::default();

    loop {
        let post = tokio::select! {
            _ = cancel.cancelled() => break,
            post = posts.recv() => match post {
                Some(post) => post,
                None => break,
            },
        };

        let participant = router.select().to_owned();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = pipeline.run_cycle(&participant, Some(&post)) => outcome,
        };

        match outcome {
            Ok(_) => stats.completed += 1,
            Err(e) => {
                stats.failed += 1;
                if e.is_retryable() {
                    tracing::warn!(participant = %participant, "cycle failed after retries: {e}");
                } else {
                    tracing::error!(participant = %participant, "cycle failed: {e}");
                }
            }
        }
    }

    stats
}
