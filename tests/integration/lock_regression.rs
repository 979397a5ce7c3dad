//! Lock gate liveness: a marker left behind by a dead holder must not
//! stall the pipeline forever.

use std::fs::File;
use std::time::{Duration, SystemTime};

use feedspeak::PipelineError;
use feedspeak::config::LockConfig;
use feedspeak::lock::LockGate;

fn leave_marker(path: &std::path::Path, age: Duration) {
    std::fs::write(path, "pid=999999\n").unwrap();
    let file = File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - age).unwrap();
}

#[tokio::test]
async fn abandoned_marker_is_taken_over() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join(".lock");
    leave_marker(&marker, Duration::from_secs(3600));

    let config = LockConfig {
        path: marker.clone(),
        poll_interval_ms: 10,
        stale_after_secs: 60,
        acquire_timeout_secs: None,
    };
    let gate = LockGate::from_config(&config);

    let guard = tokio::time::timeout(Duration::from_secs(2), gate.acquire())
        .await
        .expect("acquire must not hang on a stale marker")
        .unwrap();
    let contents = std::fs::read_to_string(&marker).unwrap();
    assert!(contents.contains(&format!("pid={}", std::process::id())));
    drop(guard);
    assert!(!marker.exists());
}

#[tokio::test]
async fn fresh_foreign_marker_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join(".lock");
    leave_marker(&marker, Duration::ZERO);

    let config = LockConfig {
        path: marker.clone(),
        poll_interval_ms: 10,
        stale_after_secs: 900,
        acquire_timeout_secs: Some(1),
    };
    let gate = LockGate::from_config(&config);

    let err = gate.acquire().await.unwrap_err();
    assert!(matches!(err, PipelineError::LockTimeout(_)));
    // The foreign marker is left alone.
    assert!(marker.exists());
}

#[tokio::test]
async fn manual_release_unblocks_waiter() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join(".lock");
    leave_marker(&marker, Duration::ZERO);

    let gate = LockGate::new(&marker).with_poll_interval(Duration::from_millis(10));
    let waiter = {
        let gate = gate.clone();
        tokio::spawn(async move { gate.acquire().await.map(drop) })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());
    gate.release().unwrap();

    tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
