//! Full runtime against a local websocket feed with scripted backends.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use feedspeak::FeedSpeakRuntime;
use feedspeak::error::Result;
use feedspeak::feed::{FeedFilter, FeedListener, ListenerExit};
use feedspeak::speech::SpeechSynthesizer;
use futures_util::SinkExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use feedspeak::participants::DEFAULT_PARTICIPANT;
use feedspeak::router::ParticipantRouter;

use crate::helpers::{RecordingSpeaker, ScriptedModel, post_frame, serve_frames, single_config};

#[tokio::test]
async fn matching_posts_are_answered_and_spoken() {
    let dir = tempfile::tempdir().unwrap();
    let addr = serve_frames(vec![
        post_frame("I saw a CAT\ntoday", &["en"]),
        post_frame("just a dog", &["en"]),
        post_frame("le chat, the cat", &["fr"]),
        "not json at all".to_owned(),
        r#"{"kind":"identity","identity":{"did":"did:plc:x"}}"#.to_owned(),
    ])
    .await;

    let mut config = single_config(dir.path(), &format!("ws://{addr}"), "Respond in one line.");
    config.filter.language = Some("en".into());
    config.filter.keyword = Some("cat".into());

    let model = ScriptedModel::replying(vec![Ok("*Meow* indeed".into())]);
    let speaker = Arc::new(RecordingSpeaker::default());
    let runtime = FeedSpeakRuntime::with_backends(&config, model.clone(), speaker.clone()).unwrap();
    let pipeline = runtime.pipeline();

    let summary = tokio::time::timeout(Duration::from_secs(5), runtime.run())
        .await
        .expect("runtime should stop when the feed closes")
        .unwrap();

    assert_eq!(summary.listener, ListenerExit::Closed);
    assert_eq!(summary.stats.completed, 1);
    assert_eq!(summary.stats.failed, 0);
    assert_eq!(
        model.requests(),
        vec![vec![
            "Respond in one line.".to_owned(),
            "**I saw a CATtoday**".to_owned()
        ]]
    );
    assert_eq!(
        speaker.spoken(),
        vec![("amy.onnx".to_owned(), "Meow indeed".to_owned())]
    );
    assert_eq!(
        pipeline.history(DEFAULT_PARTICIPANT).await.unwrap(),
        vec!["**I saw a CATtoday**", "Meow indeed"]
    );
}

#[tokio::test]
async fn priming_speaks_the_seed_before_listening() {
    let dir = tempfile::tempdir().unwrap();
    let addr = serve_frames(vec![]).await;

    let mut config = single_config(dir.path(), &format!("ws://{addr}"), "Introduce yourself.");
    config.pipeline.prime_on_start = true;

    let model = ScriptedModel::replying(vec![Ok("Hello, I am on air.".into())]);
    let speaker = Arc::new(RecordingSpeaker::default());
    let runtime = FeedSpeakRuntime::with_backends(&config, model.clone(), speaker.clone()).unwrap();

    let summary = tokio::time::timeout(Duration::from_secs(5), runtime.run())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(summary.stats.completed, 0);
    assert_eq!(model.requests(), vec![vec!["Introduce yourself.".to_owned()]]);
    assert_eq!(
        speaker.spoken(),
        vec![("amy.onnx".to_owned(), "Hello, I am on air.".to_owned())]
    );
}

#[tokio::test]
async fn failing_cycles_do_not_stop_the_worker() {
    let dir = tempfile::tempdir().unwrap();
    let addr = serve_frames(vec![
        post_frame("first", &["en"]),
        post_frame("second", &["en"]),
    ])
    .await;

    let config = single_config(dir.path(), &format!("ws://{addr}"), "");
    let runtime = FeedSpeakRuntime::with_backends(
        &config,
        ScriptedModel::replying(vec![]),
        RecordingSpeaker::failing(),
    )
    .unwrap();

    let summary = tokio::time::timeout(Duration::from_secs(5), runtime.run())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(summary.stats.failed, 2);
    assert!(!dir.path().join(".lock").exists());
}

#[tokio::test]
async fn rotating_variant_routes_to_configured_participants() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("alice.txt"), "You are Alice.").unwrap();
    std::fs::write(dir.path().join("bob.txt"), "You are Bob.").unwrap();
    let roster = dir.path().join("participants.toml");
    std::fs::write(
        &roster,
        "[alice]\nvoice = \"amy.onnx\"\nprompt = \"alice.txt\"\n\n\
         [bob]\nvoice = \"ryan.onnx\"\nprompt = \"bob.txt\"\n",
    )
    .unwrap();

    let addr = serve_frames(
        (0..6)
            .map(|i| post_frame(&format!("post {i}"), &["en"]))
            .collect(),
    )
    .await;

    let mut config = single_config(dir.path(), &format!("ws://{addr}"), "");
    config.conversation.participants_file = Some(roster);

    let speaker = Arc::new(RecordingSpeaker::default());
    let runtime =
        FeedSpeakRuntime::with_backends(&config, ScriptedModel::replying(vec![]), speaker.clone())
            .unwrap()
            .with_router(
                ParticipantRouter::seeded(vec!["alice".into(), "bob".into()], 3).unwrap(),
            );
    let pipeline = runtime.pipeline();

    let summary = tokio::time::timeout(Duration::from_secs(5), runtime.run())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.stats.completed, 6);

    let spoken = speaker.spoken();
    assert_eq!(spoken.len(), 6);
    assert!(
        spoken
            .iter()
            .all(|(voice, _)| voice == "amy.onnx" || voice == "ryan.onnx")
    );

    // Each answered post appears as post, reply, post in its participant's history.
    let alice = pipeline.history("alice").await.unwrap();
    let bob = pipeline.history("bob").await.unwrap();
    assert_eq!(alice.len() + bob.len(), 18);
    assert_eq!(alice.len() % 3, 0);
    assert_eq!(
        pipeline.snapshot("bob").await.unwrap().first().map(String::as_str),
        Some("You are Bob.")
    );
}

#[tokio::test]
async fn cancel_stops_a_quiet_feed() {
    let dir = tempfile::tempdir().unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let _ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        // Hold the connection open without sending anything.
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let config = single_config(dir.path(), &format!("ws://{addr}"), "");
    let runtime = FeedSpeakRuntime::with_backends(
        &config,
        ScriptedModel::replying(vec![]),
        Arc::new(RecordingSpeaker::default()),
    )
    .unwrap();
    let cancel = runtime.cancel_token();
    let handle = tokio::spawn(runtime.run());

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    let summary = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(summary.listener, ListenerExit::Cancelled);
}

/// Synthesizer that takes far longer than any test should wait.
struct StalledSpeaker;

#[async_trait]
impl SpeechSynthesizer for StalledSpeaker {
    async fn speak(&self, _voice: &str, _text: &str) -> Result<PathBuf> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(PathBuf::from("sound/0.wav"))
    }
}

#[tokio::test]
async fn cancel_interrupts_priming() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = single_config(dir.path(), "ws://127.0.0.1:9/feed", "Introduce yourself.");
    config.pipeline.prime_on_start = true;

    let runtime = FeedSpeakRuntime::with_backends(
        &config,
        ScriptedModel::replying(vec![]),
        Arc::new(StalledSpeaker),
    )
    .unwrap();
    let cancel = runtime.cancel_token();
    let handle = tokio::spawn(runtime.run());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(dir.path().join(".lock").exists(), "priming should hold the gate");
    let cancelled_at = Instant::now();
    cancel.cancel();

    let summary = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("priming must stop on cancel")
        .unwrap()
        .unwrap();
    assert!(cancelled_at.elapsed() < Duration::from_secs(1));
    assert_eq!(summary.listener, ListenerExit::Cancelled);
    assert!(!dir.path().join(".lock").exists());
}

#[tokio::test]
async fn reconnect_resumes_after_server_closes() {
    let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = server.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::Text(post_frame("first", &["en"])))
            .await
            .unwrap();
        let _ = ws.close(None).await;
        drop(ws);

        let (stream, _) = server.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::Text(post_frame("second", &["en"])))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let listener = FeedListener::new(format!("ws://{addr}"), FeedFilter::new()).with_reconnect(true);
    let (tx, mut rx) = mpsc::channel(4);
    let cancel = CancellationToken::new();
    let handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { listener.run(tx, cancel).await })
    };

    let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("listener should reconnect and read the second connection")
        .unwrap();
    assert_eq!((first.as_str(), second.as_str()), ("first", "second"));

    cancel.cancel();
    let exit = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(exit, ListenerExit::Cancelled);
}
