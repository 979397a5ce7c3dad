//! Configuration types for the feed-to-speech pipeline.
//!
//! Configuration is layered: a TOML file (every field optional), then an
//! environment overlay using the variable names the deployment scripts
//! already export (`GOOGLE_GEMINI_API_KEY`, `SOCKET`, `KEYWORD`, ...), then
//! [`FeedSpeakConfig::validate`], which fails fast before anything connects.

use crate::error::{PipelineError, Result};
use crate::llm::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "feedspeak.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSpeakConfig {
    /// Inbound websocket feed.
    pub feed: FeedConfig,
    /// Language / keyword constraints.
    pub filter: FilterConfig,
    /// Completion API settings.
    pub llm: LlmConfig,
    /// Synthesis and playback subprocesses.
    pub speech: SpeechConfig,
    /// Lock gate settings.
    pub lock: LockConfig,
    /// Prompt and participant sources.
    pub conversation: ConversationConfig,
    /// Pipeline behaviour.
    pub pipeline: PipelineConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

/// Websocket feed configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Websocket URL, e.g. `wss://jetstream2.us-east.bsky.network/subscribe`.
    pub url: String,
    /// Reconnect with backoff instead of stopping when the connection drops.
    pub reconnect: bool,
    /// Events buffered between the listener and the pipeline worker.
    pub queue_capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            reconnect: false,
            queue_capacity: 64,
        }
    }
}

/// Feed filter configuration. `None` disables a constraint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Required language tag (e.g. `en`).
    pub language: Option<String>,
    /// Keyword pattern, matched case-insensitively as a regular expression.
    pub keyword: Option<String>,
}

/// Completion API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// API key sent as the `key` query parameter.
    pub api_key: String,
    /// Base URL of the generative-language service.
    pub base_url: String,
    /// Model name used in the `models/<model>:generateContent` path.
    pub model: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Retry policy for transient failures.
    pub retry: RetryPolicy,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://generativelanguage.googleapis.com".to_owned(),
            model: "gemini-1.5-flash-latest".to_owned(),
            request_timeout_secs: 60,
            retry: RetryPolicy::default(),
        }
    }
}

impl LlmConfig {
    /// Request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Speech synthesis and playback configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Synthesis executable. Reads text on stdin.
    pub synth_program: String,
    /// Extra arguments placed before `--model <voice> --output-file <path>`.
    pub synth_args: Vec<String>,
    /// Playback executable. Receives the audio path as its last argument.
    pub playback_program: String,
    /// Extra arguments placed before the audio path.
    pub playback_args: Vec<String>,
    /// Voice model for the single variant.
    pub voice: String,
    /// Directory receiving synthesized audio files.
    pub sound_dir: PathBuf,
    /// Time budget for each subprocess, in seconds.
    pub timeout_secs: u64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            synth_program: "./piper".to_owned(),
            synth_args: Vec::new(),
            playback_program: "aplay".to_owned(),
            playback_args: Vec::new(),
            voice: String::new(),
            sound_dir: PathBuf::from("sound"),
            timeout_secs: 300,
        }
    }
}

impl SpeechConfig {
    /// Subprocess timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Lock gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Marker file path.
    pub path: PathBuf,
    /// Interval between marker checks, in milliseconds.
    pub poll_interval_ms: u64,
    /// A marker older than this is treated as abandoned. `0` disables.
    pub stale_after_secs: u64,
    /// Give up acquiring after this many seconds. `None` waits indefinitely.
    pub acquire_timeout_secs: Option<u64>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".lock"),
            poll_interval_ms: 1000,
            stale_after_secs: 900,
            acquire_timeout_secs: None,
        }
    }
}

/// Prompt and participant sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Seed prompt for the single variant.
    pub prompt_file: PathBuf,
    /// Participants definition file. When set, the rotating variant runs.
    pub participants_file: Option<PathBuf>,
    /// Cap on fragments per buffer. `0` keeps every fragment.
    pub max_fragments: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            prompt_file: PathBuf::from("prompt.txt"),
            participants_file: None,
            max_fragments: 0,
        }
    }
}

/// Pipeline behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Speak each participant's seed prompt once before listening.
    pub prime_on_start: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            prime_on_start: true,
        }
    }
}

/// Log output configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for daily-rotated log files. `None` logs to stderr only.
    pub log_dir: Option<PathBuf>,
}

impl FeedSpeakConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| PipelineError::Config(e.to_string()))
    }

    /// Whether a participants file is configured.
    pub fn is_rotating(&self) -> bool {
        self.conversation.participants_file.is_some()
    }

    /// Overlay values from the process environment.
    pub fn apply_env_overlay(&mut self) {
        self.apply_env_overlay_from(|key| std::env::var(key).ok());
    }

    /// Overlay values from an arbitrary lookup. Empty values are ignored.
    pub fn apply_env_overlay_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("GOOGLE_GEMINI_API_KEY") {
            self.llm.api_key = v;
        }
        if let Some(v) = get("SOCKET") {
            self.feed.url = v;
        }
        if let Some(v) = get("LANGUAGE") {
            self.filter.language = Some(v);
        }
        if let Some(v) = get("KEYWORD") {
            self.filter.keyword = Some(v);
        }
        if let Some(v) = get("VOICE") {
            self.speech.voice = v;
        }
        if let Some(v) = get("PARTICIPANTS") {
            self.conversation.participants_file = Some(PathBuf::from(v));
        }
        if let Some(v) = get("PROMPT_FILE") {
            self.conversation.prompt_file = PathBuf::from(v);
        }
        if let Some(v) = get("SOUND_DIR") {
            self.speech.sound_dir = PathBuf::from(v);
        }
        if let Some(v) = get("LOCK_FILE") {
            self.lock.path = PathBuf::from(v);
        }
    }

    /// Validates this configuration, returning the first problem found.
    ///
    /// Checks required values (API key, feed URL, single-variant voice),
    /// numeric bounds, the keyword pattern and the retry delay range.
    pub fn validate(&self) -> Result<()> {
        if self.llm.api_key.trim().is_empty() {
            return Err(PipelineError::Config(
                "llm.api_key is empty (set GOOGLE_GEMINI_API_KEY)".into(),
            ));
        }
        if self.llm.model.trim().is_empty() {
            return Err(PipelineError::Config("llm.model is empty".into()));
        }
        if self.llm.request_timeout_secs == 0 {
            return Err(PipelineError::Config(
                "llm.request_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.llm.retry.base_delay_ms > self.llm.retry.max_delay_ms {
            return Err(PipelineError::Config(
                "llm.retry base_delay_ms must be <= max_delay_ms".into(),
            ));
        }
        if self.feed.url.trim().is_empty() {
            return Err(PipelineError::Config(
                "feed.url is empty (set SOCKET)".into(),
            ));
        }
        let parsed = url::Url::parse(&self.feed.url)
            .map_err(|e| PipelineError::Config(format!("feed.url is invalid: {e}")))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(PipelineError::Config(format!(
                "feed.url must use ws or wss, got {}",
                parsed.scheme()
            )));
        }
        if self.feed.queue_capacity == 0 {
            return Err(PipelineError::Config(
                "feed.queue_capacity must be greater than 0".into(),
            ));
        }
        if let Some(keyword) = &self.filter.keyword {
            crate::feed::filter::keyword_regex(keyword)?;
        }
        if self.lock.poll_interval_ms == 0 {
            return Err(PipelineError::Config(
                "lock.poll_interval_ms must be greater than 0".into(),
            ));
        }
        if self.speech.synth_program.trim().is_empty()
            || self.speech.playback_program.trim().is_empty()
        {
            return Err(PipelineError::Config(
                "speech programs must not be empty".into(),
            ));
        }
        if self.speech.timeout_secs == 0 {
            return Err(PipelineError::Config(
                "speech.timeout_secs must be greater than 0".into(),
            ));
        }
        if !self.is_rotating() && self.speech.voice.trim().is_empty() {
            return Err(PipelineError::Config(
                "speech.voice is empty (set VOICE)".into(),
            ));
        }
        Ok(())
    }
}
