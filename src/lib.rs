//! feedspeak: speak a filtered social-media firehose.
//!
//! Posts arrive over a websocket, pass a language/keyword filter, and are
//! answered by a generative-language API. Each answer is synthesized and
//! played through external programs. Cycles are serialized by a file-based
//! lock gate:
//!
//! Firehose → Filter → Router → Lock Gate → Completion → Speech
//!
//! # Architecture
//!
//! - **Feed**: websocket listener and the language/keyword filter
//! - **Router**: picks a participant per post (rotating variant)
//! - **Pipeline**: one serialized cycle per post, guarded by the lock gate
//! - **LLM**: Gemini `generateContent` client with retry and backoff
//! - **Speech**: synthesizer and player subprocesses (`piper`, `aplay`)

pub mod config;
pub mod conversation;
pub mod diagnostics;
pub mod error;
pub mod feed;
pub mod llm;
pub mod lock;
pub mod participants;
pub mod pipeline;
pub mod router;
pub mod runtime;
pub mod speech;
pub mod text;

pub use config::FeedSpeakConfig;
pub use error::{PipelineError, Result};
pub use pipeline::{CycleOutcome, RequestPipeline};
pub use runtime::{FeedSpeakRuntime, RunSummary};
