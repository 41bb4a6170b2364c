use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// One parsed WhatsApp message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedMessage {
    pub message_id: String,
    pub timestamp: NaiveDateTime,
    pub sender: String,
    pub content: String,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default)]
    pub attachment: Option<String>,
    #[serde(default)]
    pub reply_to: Option<String>,
}

/// Source format of an import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportFormat {
    WhatsappTxt,
    ReaderBot,
}

/// Result of importing one export file.
#[derive(Debug, Clone, Serialize)]
pub struct ImportResult {
    pub import_id: String,
    pub filename: String,
    pub format: ImportFormat,
    pub imported_at: DateTime<Utc>,
    pub date_range: (NaiveDate, NaiveDate),
    pub message_count: usize,
    pub participant_count: usize,
    #[serde(skip)]
    pub messages: Vec<ImportedMessage>,
    pub errors: Vec<String>,
}

/// Entry in `imports/import-manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportManifestEntry {
    pub import_id: String,
    pub filename: String,
    pub format: ImportFormat,
    pub imported_at: DateTime<Utc>,
    pub date_range: DateRange,
    pub message_count: usize,
    pub participant_count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

/// Which dates imports cover for a group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportCoverage {
    pub earliest: Option<NaiveDate>,
    pub latest: Option<NaiveDate>,
    #[serde(default)]
    pub gaps: Vec<DateRange>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportManifest {
    #[serde(default)]
    pub imports: Vec<ImportManifestEntry>,
    #[serde(default)]
    pub coverage: ImportCoverage,
}
