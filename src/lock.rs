//! Lock gate serializing synthesis cycles.
//!
//! The gate is a marker file. A holder creates it atomically
//! (`create_new`, i.e. `O_CREAT | O_EXCL`) and removes it when its
//! [`LockGuard`] drops, so every exit path of a cycle releases the gate.
//!
//! Waiters inside one process first queue on a FIFO `tokio` mutex, then poll
//! the marker on a fixed interval; the marker alone excludes other processes
//! sharing the same path.
//!
//! A marker left behind by a crashed holder would block every later
//! `acquire` forever. Two policies bound that:
//!
//! - **staleness**: a marker whose mtime is older than `stale_after` is
//!   taken over. The stale file is first renamed aside, so of several
//!   processes racing for it only one wins, and a marker that turns out to
//!   be fresh is put back;
//! - **acquire timeout**: `acquire` gives up with
//!   [`PipelineError::LockTimeout`].
//!
//! Each marker carries a random `token=` line. A guard only removes a
//! marker holding its own token, so a holder that was taken over cannot
//! delete its successor's marker.

use crate::config::LockConfig;
use crate::error::{PipelineError, Result};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Default interval between marker checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// File-marker mutual exclusion with staleness recovery.
#[derive(Debug, Clone)]
pub struct LockGate {
    path: PathBuf,
    poll_interval: Duration,
    stale_after: Option<Duration>,
    acquire_timeout: Option<Duration>,
    local: Arc<Mutex<()>>,
}

/// Proof of holding the gate. Dropping it removes the marker.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    token: String,
    _local: OwnedMutexGuard<()>,
}

impl LockGate {
    /// A gate on `path` with a 1 s poll interval, no staleness policy and no
    /// acquire timeout.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            stale_after: None,
            acquire_timeout: None,
            local: Arc::new(Mutex::new(())),
        }
    }

    /// Build a gate from configuration.
    pub fn from_config(config: &LockConfig) -> Self {
        let gate = Self::new(&config.path)
            .with_poll_interval(Duration::from_millis(config.poll_interval_ms));
        let gate = if config.stale_after_secs > 0 {
            gate.with_stale_after(Duration::from_secs(config.stale_after_secs))
        } else {
            gate
        };
        match config.acquire_timeout_secs {
            Some(secs) => gate.with_acquire_timeout(Duration::from_secs(secs)),
            None => gate,
        }
    }

    /// Set the interval between marker checks.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Treat markers older than `age` as abandoned.
    pub fn with_stale_after(mut self, age: Duration) -> Self {
        self.stale_after = Some(age);
        self
    }

    /// Give up acquiring after `timeout`.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Marker file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a marker currently exists.
    pub fn is_locked(&self) -> bool {
        self.path.exists()
    }

    /// Wait until the gate is free, then take it.
    ///
    /// # Errors
    ///
    /// [`PipelineError::LockTimeout`] if an acquire timeout is configured and
    /// elapses; [`PipelineError::Io`] if the marker cannot be created.
    pub async fn acquire(&self) -> Result<LockGuard> {
        let deadline = self
            .acquire_timeout
            .map(|t| tokio::time::Instant::now() + t);

        let local = match deadline {
            Some(deadline) => {
                tokio::time::timeout_at(deadline, Arc::clone(&self.local).lock_owned())
                    .await
                    .map_err(|_| self.timeout_error())?
            }
            None => Arc::clone(&self.local).lock_owned().await,
        };

        let mut waited = false;
        loop {
            if let Some(token) = self.try_create_marker()? {
                if waited {
                    tracing::info!(path = %self.path.display(), "lock gate unlocked");
                }
                return Ok(LockGuard {
                    path: self.path.clone(),
                    token,
                    _local: local,
                });
            }

            if !waited {
                tracing::debug!(path = %self.path.display(), "waiting for lock gate");
                waited = true;
            }

            if let Some(deadline) = deadline
                && tokio::time::Instant::now() + self.poll_interval > deadline
            {
                return Err(self.timeout_error());
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Remove the marker if present, regardless of who created it.
    ///
    /// Normal release happens when a [`LockGuard`] drops; this is the manual
    /// override for clearing a marker left by a dead process.
    pub fn release(&self) -> Result<()> {
        remove_marker(&self.path)
    }

    fn timeout_error(&self) -> PipelineError {
        PipelineError::LockTimeout(format!(
            "{} still held after {:?}",
            self.path.display(),
            self.acquire_timeout.unwrap_or_default()
        ))
    }

    /// One attempt at taking the marker; returns its token on success.
    /// Breaks a stale marker first.
    fn try_create_marker(&self) -> Result<Option<String>> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        match create_marker(&self.path) {
            Ok(token) => return Ok(Some(token)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }

        let Some(stale_after) = self.stale_after else {
            return Ok(None);
        };
        match marker_age(&self.path) {
            Some(age) if age >= stale_after => {}
            // Fresh, or released between our create and stat.
            _ => return Ok(None),
        }
        if !self.take_over_stale(stale_after)? {
            return Ok(None);
        }

        match create_marker(&self.path) {
            Ok(token) => Ok(Some(token)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Move a stale marker out of the way. Returns `false` if another
    /// process got there first.
    fn take_over_stale(&self, stale_after: Duration) -> Result<bool> {
        let aside = self.aside_path();
        match std::fs::rename(&self.path, &aside) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        // Between our stat and the rename the marker may have been replaced
        // by a live holder's.
        let age = marker_age(&aside).unwrap_or(Duration::ZERO);
        if age < stale_after {
            match std::fs::hard_link(&aside, &self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), "failed to restore lock marker: {e}");
                }
            }
            remove_marker(&aside)?;
            return Ok(false);
        }

        tracing::warn!(
            path = %self.path.display(),
            age_secs = age.as_secs(),
            "removed stale lock marker"
        );
        remove_marker(&aside)?;
        Ok(true)
    }

    fn aside_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".stale-{}-{:016x}", std::process::id(), rand::random::<u64>()));
        self.path.with_file_name(name)
    }
}

impl LockGuard {
    /// Marker file path held by this guard.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let owned = std::fs::read_to_string(&self.path)
            .map(|contents| contents.lines().any(|line| line == self.token))
            .unwrap_or(false);
        if !owned {
            tracing::warn!(path = %self.path.display(), "lock marker no longer ours, leaving it");
            return;
        }
        if let Err(e) = remove_marker(&self.path) {
            tracing::warn!(path = %self.path.display(), "failed to remove lock marker: {e}");
        }
    }
}

/// Create the marker exclusively and return its `token=` line.
fn create_marker(path: &Path) -> std::io::Result<String> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    let token = format!("token={:016x}", rand::random::<u64>());
    let acquired_at = chrono::Utc::now().to_rfc3339();
    if let Err(e) = writeln!(
        file,
        "pid={}\n{token}\nacquired_at={acquired_at}",
        std::process::id()
    ) {
        drop(file);
        let _ = std::fs::remove_file(path);
        return Err(e);
    }
    Ok(token)
}

fn remove_marker(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn marker_age(path: &Path) -> Option<Duration> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(
        SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO),
    )
}
