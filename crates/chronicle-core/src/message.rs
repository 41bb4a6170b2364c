use serde::{Deserialize, Serialize};

/// Wire shape handed to the executor by message fetchers.
///
/// The archive core treats messages as opaque apart from `author_id`
/// (summed into `participant_count`) and `content` (word-counted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub author_id: String,
    #[serde(default)]
    pub author_name: String,
    #[serde(default)]
    pub content: String,
    /// ISO-8601 timestamp, as produced by the originating platform.
    pub timestamp: String,
    #[serde(default)]
    pub is_system: bool,
}
