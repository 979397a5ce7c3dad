//! Shared helpers for integration tests.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use feedspeak::FeedSpeakConfig;
use feedspeak::conversation::{ConversationBuffer, ConversationStore, Participant};
use feedspeak::error::Result;
use feedspeak::llm::CompletionClient;
use feedspeak::lock::LockGate;
use feedspeak::speech::SpeechSynthesizer;
use futures_util::SinkExt;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

/// Completion backend that replays scripted replies and records requests.
#[derive(Default)]
pub(crate) struct ScriptedModel {
    replies: Mutex<Vec<Result<String>>>,
    pub(crate) requests: Mutex<Vec<Vec<String>>>,
}

impl ScriptedModel {
    /// Replies are returned in order; once exhausted, `"ok"` is returned.
    pub(crate) fn replying(replies: Vec<Result<String>>) -> Arc<Self> {
        let mut replies = replies;
        replies.reverse();
        Arc::new(Self {
            replies: Mutex::new(replies),
            requests: Mutex::default(),
        })
    }

    pub(crate) fn requests(&self) -> Vec<Vec<String>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, parts: &[String]) -> Result<String> {
        self.requests.lock().unwrap().push(parts.to_vec());
        self.replies
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Ok("ok".into()))
    }
}

/// Synthesizer that records `(voice, text)` and optionally fails.
#[derive(Default)]
pub(crate) struct RecordingSpeaker {
    pub(crate) fail: bool,
    spoken: Mutex<Vec<(String, String)>>,
}

impl RecordingSpeaker {
    pub(crate) fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Default::default()
        })
    }

    pub(crate) fn spoken(&self) -> Vec<(String, String)> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for RecordingSpeaker {
    async fn speak(&self, voice: &str, text: &str) -> Result<PathBuf> {
        self.spoken
            .lock()
            .unwrap()
            .push((voice.to_owned(), text.to_owned()));
        if self.fail {
            return Err(feedspeak::PipelineError::Speech(
                "synthesizer exited with status 1".into(),
            ));
        }
        Ok(PathBuf::from("sound/0.wav"))
    }
}

/// Store with one participant per `(id, voice)` and empty seeds.
pub(crate) fn store_of(entries: &[(&str, &str)]) -> ConversationStore {
    ConversationStore::new(entries.iter().map(|(id, voice)| {
        (
            (*id).to_owned(),
            Participant {
                voice: (*voice).to_owned(),
                buffer: ConversationBuffer::new("", 0),
            },
        )
    }))
}

/// Gate in `dir` polling every 10 ms.
pub(crate) fn fast_gate(dir: &Path) -> LockGate {
    LockGate::new(dir.join(".lock")).with_poll_interval(Duration::from_millis(10))
}

/// Single-variant config rooted in `dir` with a prompt file and fast lock.
pub(crate) fn single_config(dir: &Path, feed_url: &str, prompt: &str) -> FeedSpeakConfig {
    let prompt_file = dir.join("prompt.txt");
    std::fs::write(&prompt_file, prompt).unwrap();

    let mut config = FeedSpeakConfig::default();
    config.feed.url = feed_url.to_owned();
    config.llm.api_key = "test-key".into();
    config.speech.voice = "amy.onnx".into();
    config.speech.sound_dir = dir.join("sound");
    config.lock.path = dir.join(".lock");
    config.lock.poll_interval_ms = 10;
    config.conversation.prompt_file = prompt_file;
    config.pipeline.prime_on_start = false;
    config
}

/// Serve one websocket client: send `frames` as text, then close.
pub(crate) async fn serve_frames(frames: Vec<String>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        for frame in frames {
            ws.send(Message::Text(frame)).await.unwrap();
        }
        let _ = ws.close(None).await;
        // Let the client read the close frame before the socket drops.
        tokio::time::sleep(Duration::from_millis(100)).await;
    });
    addr
}

/// A firehose commit frame carrying `text` and `langs`.
pub(crate) fn post_frame(text: &str, langs: &[&str]) -> String {
    serde_json::json!({
        "did": "did:plc:test",
        "kind": "commit",
        "commit": {
            "operation": "create",
            "collection": "app.bsky.feed.post",
            "record": {"$type": "app.bsky.feed.post", "text": text, "langs": langs}
        }
    })
    .to_string()
}
