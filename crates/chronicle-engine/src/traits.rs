//! Seams to the external collaborators: the message fetcher and the
//! summarizer. The engine drives both but interprets neither; messages
//! are opaque beyond `author_id` and `content`, and summary prose is
//! written verbatim.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use chronicle_core::{ArchiveSource, IncompleteReason, Message};

/// Failure from a collaborator, carrying the stable reason code that
/// ends up in the slot's sidecar.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Source inaccessible: {0}")]
    SourceInaccessible(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Prompt error: {0}")]
    Prompt(String),

    #[error("Export unavailable: {0}")]
    ExportUnavailable(String),
}

impl CollaboratorError {
    pub fn reason(&self) -> IncompleteReason {
        match self {
            CollaboratorError::SourceInaccessible(_) => IncompleteReason::SourceInaccessible,
            CollaboratorError::RateLimited(_) => IncompleteReason::RateLimited,
            CollaboratorError::Api(_) => IncompleteReason::ApiError,
            CollaboratorError::Prompt(_) => IncompleteReason::PromptError,
            CollaboratorError::ExportUnavailable(_) => IncompleteReason::ExportUnavailable,
        }
    }
}

/// Fetches raw messages for a UTC window.
///
/// An empty result is a legitimate outcome (the slot resolves as
/// `NO_MESSAGES`); an error marks the iteration failed.
#[async_trait]
pub trait MessageFetcher: Send + Sync {
    async fn fetch(
        &self,
        source: &ArchiveSource,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> std::result::Result<Vec<Message>, CollaboratorError>;
}

/// Requested summary depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryType {
    Brief,
    #[default]
    Detailed,
    Comprehensive,
}

impl fmt::Display for SummaryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SummaryType::Brief => "brief",
            SummaryType::Detailed => "detailed",
            SummaryType::Comprehensive => "comprehensive",
        };
        write!(f, "{s}")
    }
}

/// What the summarizer hands back for one period.
#[derive(Debug, Clone)]
pub struct SummaryOutput {
    pub content: String,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub model: String,
    pub prompt_version: String,
    pub prompt_checksum: String,
    pub options: serde_json::Value,
}

/// Turns a batch of messages into summary prose.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        messages: &[Message],
        api_key: &str,
        summary_type: SummaryType,
        perspective: &str,
    ) -> std::result::Result<SummaryOutput, CollaboratorError>;
}
