//! Participant selection for the rotating variant.
//!
//! Every passing post goes to one participant chosen uniformly at random
//! from the fixed id set. There is no fairness guarantee and recently used
//! participants are not excluded.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::error::{PipelineError, Result};

/// Picks which participant answers the next post.
#[derive(Debug, Clone)]
pub struct ParticipantRouter {
    ids: Vec<String>,
    rng: StdRng,
}

impl ParticipantRouter {
    /// Router over `ids` seeded from OS entropy.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Config`] when `ids` is empty.
    pub fn new(ids: Vec<String>) -> Result<Self> {
        Self::with_rng(ids, StdRng::from_entropy())
    }

    /// Router with an explicit random source.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Config`] when `ids` is empty.
    pub fn with_rng(ids: Vec<String>, rng: StdRng) -> Result<Self> {
        if ids.is_empty() {
            return Err(PipelineError::Config(
                "at least one participant is required".into(),
            ));
        }
        Ok(Self { ids, rng })
    }

    /// Router with a deterministic seed.
    pub fn seeded(ids: Vec<String>, seed: u64) -> Result<Self> {
        Self::with_rng(ids, StdRng::seed_from_u64(seed))
    }

    /// Candidate ids.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Choose a participant for the next post.
    pub fn select(&mut self) -> &str {
        if self.ids.len() == 1 {
            return &self.ids[0];
        }
        self.ids
            .choose(&mut self.rng)
            .map_or(self.ids[0].as_str(), String::as_str)
    }
}
