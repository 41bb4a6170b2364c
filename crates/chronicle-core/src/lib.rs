//! Core data model and on-disk layout for the retrospective summary
//! archive: sources, periods, sidecar metadata, configuration.

pub mod config;
pub mod error;
pub mod layout;
pub mod message;
pub mod meta;
pub mod period;
pub mod types;

pub use config::{ChronicleConfig, DriveConfig, KeysConfig, RetentionConfig};
pub use error::{CoreError, Result};
pub use message::Message;
pub use meta::{
    BackfillInfo, CostEntry, GenerationInfo, GenerationLock, IncompleteInfo, IncompleteReason,
    IntegrityInfo, SidecarMetadata, SummaryStatistics, SummaryStatus, TokenUsage,
};
pub use period::{DstTransition, Granularity, PeriodInfo};
pub use types::{ArchiveSource, SourceType};
