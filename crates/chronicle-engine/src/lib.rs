//! Retrospective executor: plans periods over a date range and drives
//! generation under a cost budget with cooperative cancel/pause/resume.

pub mod engine;
pub mod error;
pub mod job;
pub mod periods;
pub mod traits;

pub use engine::{
    EngineOptions, ProgressCallback, RetrospectiveEngine, DEFAULT_ESTIMATE_MODEL,
};
pub use error::{EngineError, Result};
pub use job::{CostProgress, GenerationJob, GenerationProgress, JobPolicy, JobStatus};
pub use periods::expand_periods;
pub use traits::{CollaboratorError, MessageFetcher, SummaryOutput, SummaryType, Summarizer};
