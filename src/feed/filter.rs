//! Language / keyword filter over feed events.

use super::FeedEvent;
use crate::config::FilterConfig;
use crate::error::{PipelineError, Result};
use crate::text::normalize_post;
use regex::{Regex, RegexBuilder};

/// Why an event was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No commit or no record.
    NoRecord,
    /// Record without text.
    NoText,
    /// Required language tag missing.
    Language,
    /// Keyword did not match.
    Keyword,
    /// Nothing left after normalization.
    Empty,
}

/// Outcome of filtering one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    /// Event enters the pipeline with this normalized text.
    Pass(String),
    /// Event is discarded.
    Drop(DropReason),
}

impl FilterDecision {
    /// Normalized text when the event passed.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Pass(text) => Some(text),
            Self::Drop(_) => None,
        }
    }
}

/// Compile a keyword into a case-insensitive pattern.
///
/// # Errors
///
/// [`PipelineError::Config`] if the keyword is not a valid pattern.
pub fn keyword_regex(keyword: &str) -> Result<Regex> {
    RegexBuilder::new(keyword)
        .case_insensitive(true)
        .build()
        .map_err(|e| PipelineError::Config(format!("filter.keyword is not a valid pattern: {e}")))
}

/// Pure predicate deciding which events reach the pipeline.
#[derive(Debug, Clone, Default)]
pub struct FeedFilter {
    language: Option<String>,
    keyword: Option<Regex>,
}

impl FeedFilter {
    /// A filter with no constraints.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from configuration. Blank values disable a constraint.
    pub fn from_config(config: &FilterConfig) -> Result<Self> {
        let mut filter = Self::new();
        if let Some(language) = config.language.as_deref().map(str::trim)
            && !language.is_empty()
        {
            filter = filter.with_language(language);
        }
        if let Some(keyword) = config.keyword.as_deref()
            && !keyword.trim().is_empty()
        {
            filter = filter.with_keyword(keyword)?;
        }
        Ok(filter)
    }

    /// Require this language tag.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Require a case-insensitive match of this pattern.
    pub fn with_keyword(mut self, keyword: &str) -> Result<Self> {
        self.keyword = Some(keyword_regex(keyword)?);
        Ok(self)
    }

    /// Decide whether `event` enters the pipeline.
    pub fn evaluate(&self, event: &FeedEvent) -> FilterDecision {
        let Some(record) = event.record() else {
            return FilterDecision::Drop(DropReason::NoRecord);
        };
        let Some(text) = record.text.as_deref() else {
            return FilterDecision::Drop(DropReason::NoText);
        };

        if let Some(language) = &self.language {
            let tagged = record
                .langs
                .as_ref()
                .is_some_and(|langs| langs.iter().any(|l| l == language));
            if !tagged {
                return FilterDecision::Drop(DropReason::Language);
            }
        }

        if let Some(keyword) = &self.keyword
            && !keyword.is_match(text)
        {
            return FilterDecision::Drop(DropReason::Keyword);
        }

        let normalized = normalize_post(text);
        if normalized.is_empty() {
            return FilterDecision::Drop(DropReason::Empty);
        }
        FilterDecision::Pass(normalized)
    }
}
