//! Speech synthesis and playback through external programs.
//!
//! [`CommandSpeaker`] runs two subprocesses per reply:
//!
//! 1. `<synth_program> <synth_args..> --model <voice> --output-file <wav>`
//!    with the reply text on stdin;
//! 2. `<playback_program> <playback_args..> <wav>`.
//!
//! No shell is involved, so reply text never reaches a command line. Each
//! subprocess runs under a timeout and is killed if it is still alive when
//! the timeout fires. Audio files are named after the current Unix time in
//! milliseconds and are left in `sound_dir`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::SpeechConfig;
use crate::error::{PipelineError, Result};

/// Longest stderr excerpt carried in an error.
const STDERR_EXCERPT_LEN: usize = 512;

/// Turns reply text into audible speech.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` with `voice`, play it, and return the audio path.
    async fn speak(&self, voice: &str, text: &str) -> Result<PathBuf>;
}

/// Subprocess-backed synthesizer (`piper` + `aplay` by default).
#[derive(Debug, Clone)]
pub struct CommandSpeaker {
    synth_program: String,
    synth_args: Vec<String>,
    playback_program: String,
    playback_args: Vec<String>,
    sound_dir: PathBuf,
    timeout: Duration,
}

impl CommandSpeaker {
    /// Speaker running the programs named in `config`.
    pub fn from_config(config: &SpeechConfig) -> Self {
        Self {
            synth_program: config.synth_program.clone(),
            synth_args: config.synth_args.clone(),
            playback_program: config.playback_program.clone(),
            playback_args: config.playback_args.clone(),
            sound_dir: config.sound_dir.clone(),
            timeout: config.timeout(),
        }
    }

    /// Directory audio files are written to.
    pub fn sound_dir(&self) -> &Path {
        &self.sound_dir
    }

    /// Create the sound directory if it does not exist yet.
    pub fn ensure_sound_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.sound_dir).map_err(|e| {
            PipelineError::Speech(format!(
                "cannot create sound directory {}: {e}",
                self.sound_dir.display()
            ))
        })
    }

    /// Next audio path: `<sound_dir>/<unix millis>.wav`.
    pub fn next_audio_path(&self) -> PathBuf {
        let millis = chrono::Utc::now().timestamp_millis();
        let mut path = self.sound_dir.join(format!("{millis}.wav"));
        let mut n = 1;
        while path.exists() {
            path = self.sound_dir.join(format!("{millis}-{n}.wav"));
            n += 1;
        }
        path
    }

    async fn synthesize(&self, voice: &str, text: &str, output: &Path) -> Result<()> {
        let mut command = Command::new(&self.synth_program);
        command
            .args(&self.synth_args)
            .arg("--model")
            .arg(voice)
            .arg("--output-file")
            .arg(output);
        run_with_timeout(command, Some(text), self.timeout, &self.synth_program).await
    }

    async fn play(&self, audio: &Path) -> Result<()> {
        let mut command = Command::new(&self.playback_program);
        command.args(&self.playback_args).arg(audio);
        run_with_timeout(command, None, self.timeout, &self.playback_program).await
    }
}

#[async_trait]
impl SpeechSynthesizer for CommandSpeaker {
    async fn speak(&self, voice: &str, text: &str) -> Result<PathBuf> {
        self.ensure_sound_dir()?;
        let audio = self.next_audio_path();

        tracing::debug!(audio = %audio.display(), voice, "synthesizing reply");
        self.synthesize(voice, text, &audio).await?;

        tracing::debug!(audio = %audio.display(), "playing audio");
        self.play(&audio).await?;
        Ok(audio)
    }
}

/// Spawn `command`, optionally feed `stdin`, and wait for a zero exit.
async fn run_with_timeout(
    mut command: Command,
    stdin: Option<&str>,
    timeout: Duration,
    program: &str,
) -> Result<()> {
    command
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| PipelineError::Speech(format!("failed to spawn {program}: {e}")))?;

    let run = async move {
        if let Some(text) = stdin
            && let Some(mut pipe) = child.stdin.take()
        {
            match pipe.write_all(text.as_bytes()).await {
                Ok(()) => {}
                // The program exited without reading; its status decides.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    tracing::debug!(program, "stdin closed early");
                }
                Err(e) => {
                    return Err(PipelineError::Speech(format!(
                        "failed to write to {program}: {e}"
                    )));
                }
            }
            drop(pipe);
        }
        child
            .wait_with_output()
            .await
            .map_err(|e| PipelineError::Speech(format!("failed to wait for {program}: {e}")))
    };

    let output = tokio::time::timeout(timeout, run)
        .await
        .map_err(|_| PipelineError::Speech(format!("{program} timed out after {timeout:?}")))??;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let excerpt: String = stderr.trim().chars().take(STDERR_EXCERPT_LEN).collect();
    Err(PipelineError::Speech(format!(
        "{program} exited with {}: {excerpt}",
        output.status
    )))
}
