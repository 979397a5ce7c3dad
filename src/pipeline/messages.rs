//! Values produced by the request pipeline.

use std::path::PathBuf;

/// Result of one completed synthesize-and-speak cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Participant whose conversation was advanced.
    pub participant: String,
    /// Reply as stored and spoken, emphasis markers removed.
    pub reply: String,
    /// Audio file written by the synthesizer. `None` when the reply was
    /// blank and nothing was spoken.
    pub audio_path: Option<PathBuf>,
}

