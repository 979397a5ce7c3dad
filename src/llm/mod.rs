//! Completion backends.
//!
//! The pipeline talks to a [`CompletionClient`]; the production backend is
//! [`gemini::GeminiClient`]. The trait is the seam tests use to substitute a
//! scripted model.

pub mod gemini;
pub mod retry;

use crate::error::Result;
use async_trait::async_trait;

pub use gemini::GeminiClient;
pub use retry::RetryPolicy;

/// A remote model that turns an ordered list of text parts into one reply.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Stable backend name for logs.
    fn name(&self) -> &str;

    /// Send `parts` in order and return the textual reply.
    async fn complete(&self, parts: &[String]) -> Result<String>;
}
