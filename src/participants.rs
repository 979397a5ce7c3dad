//! Participant roster loading.
//!
//! The rotating variant reads a roster file mapping participant id to a
//! voice and a prompt file:
//!
//! ```toml
//! [alice]
//! voice = "voices/en_US-amy-medium.onnx"
//! prompt = "prompts/alice.txt"
//! ```
//!
//! JSON with the same shape is accepted when the file ends in `.json`.
//! Relative prompt paths resolve against the roster file's directory. The
//! single variant builds a one-entry store from `prompt_file` and
//! `speech.voice` instead.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::config::FeedSpeakConfig;
use crate::conversation::{ConversationBuffer, ConversationStore, Participant};
use crate::error::{PipelineError, Result};

/// Id of the implicit participant in the single variant.
pub const DEFAULT_PARTICIPANT: &str = "default";

/// One roster entry as written in the file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ParticipantSpec {
    /// Voice model for the synthesizer.
    pub voice: String,
    /// Prompt file seeding this participant's conversation.
    pub prompt: PathBuf,
}

/// Parse a roster file into id → spec, with prompt paths made absolute
/// relative to the roster's directory.
///
/// # Errors
///
/// [`PipelineError::Config`] if the file cannot be read, parsed, is empty,
/// or an entry has a blank voice.
pub fn load_roster(path: &Path) -> Result<BTreeMap<String, ParticipantSpec>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        PipelineError::Config(format!("cannot read participants file {}: {e}", path.display()))
    })?;

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let mut roster: BTreeMap<String, ParticipantSpec> = if is_json {
        serde_json::from_str(&content).map_err(|e| {
            PipelineError::Config(format!("invalid participants file {}: {e}", path.display()))
        })?
    } else {
        toml::from_str(&content).map_err(|e| {
            PipelineError::Config(format!("invalid participants file {}: {e}", path.display()))
        })?
    };

    if roster.is_empty() {
        return Err(PipelineError::Config(format!(
            "participants file {} defines no participants",
            path.display()
        )));
    }

    let base = path.parent().unwrap_or_else(|| Path::new(""));
    for (id, spec) in &mut roster {
        if spec.voice.trim().is_empty() {
            return Err(PipelineError::Config(format!(
                "participant {id} has an empty voice"
            )));
        }
        if spec.prompt.is_relative() {
            spec.prompt = base.join(&spec.prompt);
        }
    }

    Ok(roster)
}

fn read_prompt(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| PipelineError::Config(format!("cannot read prompt {}: {e}", path.display())))
}

/// Build the participant store for whichever variant `config` selects.
///
/// # Errors
///
/// [`PipelineError::Config`] when the roster or a prompt file cannot be read.
pub fn load_store(config: &FeedSpeakConfig) -> Result<ConversationStore> {
    let max = config.conversation.max_fragments;

    if let Some(roster_path) = &config.conversation.participants_file {
        let roster = load_roster(roster_path)?;
        let mut participants = Vec::with_capacity(roster.len());
        for (id, spec) in roster {
            let seed = read_prompt(&spec.prompt)?;
            tracing::debug!(participant = %id, voice = %spec.voice, "participant loaded");
            participants.push((
                id,
                Participant {
                    voice: spec.voice,
                    buffer: ConversationBuffer::new(seed, max),
                },
            ));
        }
        return Ok(ConversationStore::new(participants));
    }

    let seed = read_prompt(&config.conversation.prompt_file)?;
    Ok(ConversationStore::new([(
        DEFAULT_PARTICIPANT.to_owned(),
        Participant {
            voice: config.speech.voice.clone(),
            buffer: ConversationBuffer::new(seed, max),
        },
    )]))
}
