//! WhatsApp chat history importer.
//!
//! Two input formats: the native text export (one file per group, lines
//! prefixed by a date/time in one of several regional layouts) and the
//! reader-bot JSON export. Imported payloads land under the group's
//! `imports/` directory and can be replayed per period as fetcher input.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use chronicle_core::layout::{atomic_write_json, slugify};
use chronicle_core::Message;

use crate::error::{ImportError, Result};
use crate::types::{
    DateRange, ImportCoverage, ImportFormat, ImportManifest, ImportManifestEntry, ImportResult,
    ImportedMessage,
};

pub struct WhatsAppImporter {
    archive_root: PathBuf,
    datetime_patterns: Vec<Regex>,
    system_patterns: Vec<Regex>,
}

impl WhatsAppImporter {
    pub fn new(archive_root: impl Into<PathBuf>) -> Self {
        // [DD/MM/YYYY, HH:MM:SS] | DD/MM/YYYY, HH:MM - | MM/DD/YY, HH:MM -
        let datetime_patterns = [
            r"^\[(\d{1,2}/\d{1,2}/\d{2,4}),\s*(\d{1,2}:\d{2}(?::\d{2})?(?:\s*[AP]M)?)\]",
            r"^(\d{1,2}/\d{1,2}/\d{2,4}),\s*(\d{1,2}:\d{2}(?::\d{2})?(?:\s*[AP]M)?)\s*-",
            r"^(\d{1,2}/\d{1,2}/\d{2}),\s*(\d{1,2}:\d{2}(?:\s*[AP]M)?)\s*-",
        ];
        let system_patterns = [
            r"(?i)Messages and calls are end-to-end encrypted",
            r"(?i)created group",
            r"(?i)added you",
            r"(?i)changed the subject",
            r"(?i)changed this group's icon",
            r"(?i)left$",
            r"(?i)was removed$",
            r"(?i)joined using this group's invite link",
        ];
        Self {
            archive_root: archive_root.into(),
            datetime_patterns: compile_all(&datetime_patterns),
            system_patterns: compile_all(&system_patterns),
        }
    }

    /// Import a native WhatsApp text export.
    #[instrument(skip(self), fields(file = %file_path.display(), group = group_id))]
    pub fn import_txt_export(
        &self,
        file_path: &Path,
        group_id: &str,
        group_name: &str,
    ) -> Result<ImportResult> {
        if !file_path.exists() {
            return Err(ImportError::ExportNotFound(
                file_path.display().to_string(),
            ));
        }

        let content = read_lossy(file_path)?;
        let mut messages: Vec<ImportedMessage> = Vec::new();
        let mut errors = Vec::new();
        let mut participants = BTreeSet::new();
        let mut current: Option<ImportedMessage> = None;
        let mut counter: usize = 0;

        for (line_num, raw_line) in content.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }

            match self.parse_message_line(line) {
                Some((timestamp, sender, text)) => {
                    if let Some(message) = current.take() {
                        messages.push(message);
                    }
                    counter += 1;

                    let is_system =
                        self.system_patterns.iter().any(|p| p.is_match(&text)) || sender == "System";
                    if !is_system {
                        participants.insert(sender.clone());
                    }

                    current = Some(ImportedMessage {
                        message_id: format!("wa_{}", counter),
                        timestamp,
                        sender,
                        content: text,
                        is_system,
                        attachment: None,
                        reply_to: None,
                    });
                }
                None => match current.as_mut() {
                    // Lines without a date prefix extend the previous message.
                    Some(message) => {
                        message.content.push('\n');
                        message.content.push_str(line);
                    }
                    None => {
                        if !line.to_lowercase().contains("end-to-end encrypted") {
                            errors.push(format!(
                                "Line {}: Could not parse: {}",
                                line_num + 1,
                                truncated(line, 50)
                            ));
                        }
                    }
                },
            }
        }
        if let Some(message) = current {
            messages.push(message);
        }

        let date_range = range_of(&messages);
        let import_id = new_import_id();
        self.save_import(
            group_id,
            group_name,
            &import_id,
            &messages,
            ImportFormat::WhatsappTxt,
            &file_name(file_path),
        )?;

        info!(messages = messages.len(), "imported WhatsApp text export");
        Ok(ImportResult {
            import_id,
            filename: file_name(file_path),
            format: ImportFormat::WhatsappTxt,
            imported_at: Utc::now(),
            date_range,
            message_count: messages.len(),
            participant_count: participants.len(),
            messages,
            errors,
        })
    }

    /// Import a reader-bot JSON export: `{ "messages": [ ... ] }`.
    #[instrument(skip(self), fields(file = %file_path.display(), group = group_id))]
    pub fn import_reader_bot_json(
        &self,
        file_path: &Path,
        group_id: &str,
        group_name: &str,
    ) -> Result<ImportResult> {
        #[derive(Deserialize)]
        struct Export {
            #[serde(default)]
            messages: Vec<ReaderBotMessage>,
        }
        #[derive(Deserialize)]
        struct ReaderBotMessage {
            id: Option<String>,
            timestamp: String,
            sender: String,
            #[serde(default)]
            content: String,
            #[serde(default)]
            is_system: bool,
            #[serde(default)]
            attachment: Option<String>,
            #[serde(default)]
            reply_to: Option<String>,
        }

        let data = std::fs::read_to_string(file_path)
            .map_err(|_| ImportError::ExportNotFound(file_path.display().to_string()))?;
        let export: Export = serde_json::from_str(&data)?;

        let mut messages = Vec::new();
        let mut participants = BTreeSet::new();
        for (i, msg) in export.messages.into_iter().enumerate() {
            let timestamp = parse_iso_datetime(&msg.timestamp)
                .ok_or_else(|| ImportError::BadDate(msg.timestamp.clone()))?;
            let message = ImportedMessage {
                message_id: msg.id.unwrap_or_else(|| format!("wa_{}", i)),
                timestamp,
                sender: msg.sender,
                content: msg.content,
                is_system: msg.is_system,
                attachment: msg.attachment,
                reply_to: msg.reply_to,
            };
            if !message.is_system {
                participants.insert(message.sender.clone());
            }
            messages.push(message);
        }

        let date_range = range_of(&messages);
        let import_id = new_import_id();
        self.save_import(
            group_id,
            group_name,
            &import_id,
            &messages,
            ImportFormat::ReaderBot,
            &file_name(file_path),
        )?;

        info!(messages = messages.len(), "imported reader-bot export");
        Ok(ImportResult {
            import_id,
            filename: file_name(file_path),
            format: ImportFormat::ReaderBot,
            imported_at: Utc::now(),
            date_range,
            message_count: messages.len(),
            participant_count: participants.len(),
            messages,
            errors: Vec::new(),
        })
    }

    /// Replay imported messages for a time window, shaped like fetcher
    /// output and sorted by timestamp.
    pub fn messages_for_period(
        &self,
        group_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Message>> {
        let Some(group_dir) = self.find_group_dir(group_id) else {
            return Ok(Vec::new());
        };
        let imports_dir = group_dir.join("imports");
        if !imports_dir.exists() {
            return Ok(Vec::new());
        }

        let mut result = Vec::new();
        for entry in std::fs::read_dir(&imports_dir)?.filter_map(|e| e.ok()) {
            let path = entry.path();
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
            if !name.is_some_and(|n| n.ends_with("_messages.json")) {
                continue;
            }
            let data = std::fs::read_to_string(&path)?;
            let messages: Vec<ImportedMessage> = match serde_json::from_str(&data) {
                Ok(messages) => messages,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable import payload");
                    continue;
                }
            };
            for message in messages {
                if message.timestamp >= start && message.timestamp <= end {
                    result.push(Message {
                        id: message.message_id,
                        author_id: message.sender.clone(),
                        author_name: message.sender,
                        content: message.content,
                        timestamp: message.timestamp.format("%Y-%m-%dT%H:%M:%S").to_string(),
                        is_system: message.is_system,
                    });
                }
            }
        }

        result.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(result)
    }

    /// Coverage recorded in the group's import manifest.
    pub fn coverage(&self, group_id: &str) -> Option<ImportCoverage> {
        let manifest_path = self
            .find_group_dir(group_id)?
            .join("imports")
            .join("import-manifest.json");
        let data = std::fs::read_to_string(manifest_path).ok()?;
        let manifest: ImportManifest = serde_json::from_str(&data).ok()?;
        Some(manifest.coverage)
    }

    fn parse_message_line(&self, line: &str) -> Option<(NaiveDateTime, String, String)> {
        for pattern in &self.datetime_patterns {
            let Some(captures) = pattern.captures(line) else {
                continue;
            };
            let date_str = captures.get(1)?.as_str();
            let time_str = captures.get(2)?.as_str();
            let Some(timestamp) = parse_datetime(date_str, time_str) else {
                continue;
            };

            let rest = line[captures.get(0)?.end()..]
                .trim_start_matches([' ', '-', ':'])
                .trim();

            return match rest.split_once(": ") {
                Some((sender, content)) => Some((
                    timestamp,
                    sender.trim().to_string(),
                    content.trim().to_string(),
                )),
                // No sender separator: a system line.
                None => Some((timestamp, "System".to_string(), rest.to_string())),
            };
        }
        None
    }

    fn find_group_dir(&self, group_id: &str) -> Option<PathBuf> {
        let sources_dir = self.archive_root.join("sources").join("whatsapp");
        let suffix = format!("_{}", group_id);
        std::fs::read_dir(sources_dir)
            .ok()?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .find(|p| {
                p.is_dir()
                    && p.file_name()
                        .map(|n| n.to_string_lossy().ends_with(&suffix))
                        .unwrap_or(false)
            })
    }

    fn save_import(
        &self,
        group_id: &str,
        group_name: &str,
        import_id: &str,
        messages: &[ImportedMessage],
        format: ImportFormat,
        filename: &str,
    ) -> Result<()> {
        let group_dir = self
            .archive_root
            .join("sources")
            .join("whatsapp")
            .join(format!("{}_{}", slugify(group_name), group_id));
        let imports_dir = group_dir.join("imports");
        std::fs::create_dir_all(&imports_dir)?;

        atomic_write_json(
            &imports_dir.join(format!("{}_messages.json", import_id)),
            &messages,
        )?;

        let manifest_path = imports_dir.join("import-manifest.json");
        let mut manifest: ImportManifest = std::fs::read_to_string(&manifest_path)
            .ok()
            .and_then(|data| serde_json::from_str(&data).ok())
            .unwrap_or_default();

        let dates: BTreeSet<NaiveDate> = messages.iter().map(|m| m.timestamp.date()).collect();
        manifest.imports.push(ImportManifestEntry {
            import_id: import_id.to_string(),
            filename: filename.to_string(),
            format,
            imported_at: Utc::now(),
            date_range: DateRange {
                start: dates.iter().next().copied(),
                end: dates.iter().next_back().copied(),
            },
            message_count: messages.len(),
            participant_count: messages
                .iter()
                .filter(|m| !m.is_system)
                .map(|m| m.sender.as_str())
                .collect::<BTreeSet<_>>()
                .len(),
        });

        let all_dates: BTreeSet<NaiveDate> = manifest
            .imports
            .iter()
            .flat_map(|imp| [imp.date_range.start, imp.date_range.end])
            .flatten()
            .collect();
        manifest.coverage.earliest = all_dates.iter().next().copied();
        manifest.coverage.latest = all_dates.iter().next_back().copied();

        atomic_write_json(&manifest_path, &manifest)?;
        Ok(())
    }
}

fn compile_all(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!(pattern = p, error = %e, "invalid importer pattern");
                None
            }
        })
        .collect()
}

fn read_lossy(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    // Strip a UTF-8 BOM if present.
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF][..]).unwrap_or(&bytes);
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn new_import_id() -> String {
    format!("imp_{}", &Uuid::new_v4().simple().to_string()[..12])
}

fn truncated(line: &str, max: usize) -> String {
    if line.chars().count() <= max {
        line.to_string()
    } else {
        format!("{}...", line.chars().take(max).collect::<String>())
    }
}

fn range_of(messages: &[ImportedMessage]) -> (NaiveDate, NaiveDate) {
    let dates: BTreeSet<NaiveDate> = messages.iter().map(|m| m.timestamp.date()).collect();
    let today = Utc::now().date_naive();
    (
        dates.iter().next().copied().unwrap_or(today),
        dates.iter().next_back().copied().unwrap_or(today),
    )
}

/// Parse a WhatsApp export date + time pair.
///
/// Separators are normalized to `/`; DD/MM vs MM/DD ambiguity resolves
/// by the `month ≤ 12` constraint (fields swap when violated); two-digit
/// years are 2000-based; 12-hour clocks honour AM/PM.
fn parse_datetime(date_str: &str, time_str: &str) -> Option<NaiveDateTime> {
    let normalized = date_str.replace(['.', '-'], "/");
    let parts: Vec<&str> = normalized.split('/').collect();
    if parts.len() != 3 {
        return None;
    }

    let mut day: u32 = parts[0].parse().ok()?;
    let mut month: u32 = parts[1].parse().ok()?;
    let year: i32 = match parts[2].len() {
        4 => parts[2].parse().ok()?,
        2 => 2000 + parts[2].parse::<i32>().ok()?,
        _ => return None,
    };
    if month > 12 {
        std::mem::swap(&mut day, &mut month);
    }

    let time_str = time_str.trim();
    let upper = time_str.to_uppercase();
    let is_pm = upper.contains("PM");
    let is_am = upper.contains("AM");
    let cleaned: String = upper.replace("AM", "").replace("PM", "").trim().to_string();

    let pieces: Vec<&str> = cleaned.split(':').collect();
    let mut hour: u32 = pieces.first()?.parse().ok()?;
    let minute: u32 = pieces.get(1).and_then(|m| m.parse().ok()).unwrap_or(0);
    let second: u32 = pieces.get(2).and_then(|s| s.parse().ok()).unwrap_or(0);

    if is_pm && hour < 12 {
        hour += 12;
    } else if is_am && hour == 12 {
        hour = 0;
    }

    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
}

fn parse_iso_datetime(value: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn importer(dir: &tempfile::TempDir) -> WhatsAppImporter {
        WhatsAppImporter::new(dir.path())
    }

    #[test]
    fn parses_bracketed_datetime_format() {
        let dir = tempfile::tempdir().unwrap();
        let (ts, sender, content) = importer(&dir)
            .parse_message_line("[12/02/2026, 14:30:05] Alice: hello there")
            .unwrap();
        assert_eq!(ts.to_string(), "2026-02-12 14:30:05");
        assert_eq!(sender, "Alice");
        assert_eq!(content, "hello there");
    }

    #[test]
    fn parses_dash_format_with_ampm() {
        let dir = tempfile::tempdir().unwrap();
        let (ts, sender, _) = importer(&dir)
            .parse_message_line("02/12/26, 2:30 PM - Bob: hi")
            .unwrap();
        // month 02, day 12 in MM/DD for two-digit-year layout; 2:30 PM → 14:30.
        assert_eq!(ts.to_string(), "2026-12-02 14:30:00");
        assert_eq!(sender, "Bob");
    }

    #[test]
    fn month_over_twelve_swaps_fields() {
        assert_eq!(
            parse_datetime("13/02/2026", "09:00").unwrap().to_string(),
            "2026-02-13 09:00:00"
        );
        assert_eq!(
            parse_datetime("02/13/2026", "09:00").unwrap().to_string(),
            "2026-02-13 09:00:00"
        );
    }

    #[test]
    fn midnight_twelve_am_wraps_to_zero() {
        let ts = parse_datetime("01/01/2026", "12:05 AM").unwrap();
        assert_eq!(ts.to_string(), "2026-01-01 00:05:00");
    }

    #[test]
    fn import_txt_joins_continuation_lines() {
        let dir = tempfile::tempdir().unwrap();
        let export = dir.path().join("chat.txt");
        std::fs::write(
            &export,
            "[10/02/2026, 09:00:00] Alice: first line\nsecond line\n[10/02/2026, 09:05:00] Bob: reply\n",
        )
        .unwrap();

        let result = importer(&dir)
            .import_txt_export(&export, "g1", "Family")
            .unwrap();
        assert_eq!(result.message_count, 2);
        assert_eq!(result.participant_count, 2);
        assert_eq!(result.messages[0].content, "first line\nsecond line");
    }

    #[test]
    fn system_lines_are_flagged_and_excluded_from_participants() {
        let dir = tempfile::tempdir().unwrap();
        let export = dir.path().join("chat.txt");
        std::fs::write(
            &export,
            "[10/02/2026, 09:00:00] Alice created group \"Family\"\n[10/02/2026, 09:01:00] Alice: hi\n",
        )
        .unwrap();

        let result = importer(&dir)
            .import_txt_export(&export, "g1", "Family")
            .unwrap();
        assert_eq!(result.message_count, 2);
        assert!(result.messages[0].is_system);
        assert_eq!(result.participant_count, 1);
    }

    #[test]
    fn import_persists_payload_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let export = dir.path().join("chat.txt");
        std::fs::write(&export, "[10/02/2026, 09:00:00] Alice: hi\n").unwrap();

        let wa = importer(&dir);
        let result = wa.import_txt_export(&export, "g1", "Family").unwrap();

        let imports_dir = dir.path().join("sources/whatsapp/family_g1/imports");
        assert!(imports_dir
            .join(format!("{}_messages.json", result.import_id))
            .exists());

        let coverage = wa.coverage("g1").unwrap();
        assert_eq!(
            coverage.earliest,
            Some(NaiveDate::from_ymd_opt(2026, 2, 10).unwrap())
        );
        assert_eq!(coverage.latest, coverage.earliest);
    }

    #[test]
    fn replay_filters_and_sorts_by_period() {
        let dir = tempfile::tempdir().unwrap();
        let export = dir.path().join("chat.txt");
        std::fs::write(
            &export,
            "[10/02/2026, 12:00:00] Alice: in range\n[11/02/2026, 12:00:00] Bob: out of range\n[10/02/2026, 08:00:00] Carol: earlier\n",
        )
        .unwrap();

        let wa = importer(&dir);
        wa.import_txt_export(&export, "g1", "Family").unwrap();

        let day = NaiveDate::from_ymd_opt(2026, 2, 10).unwrap();
        let messages = wa
            .messages_for_period(
                "g1",
                day.and_hms_opt(0, 0, 0).unwrap(),
                day.and_hms_opt(23, 59, 59).unwrap(),
            )
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].author_id, "Carol");
        assert_eq!(messages[1].author_id, "Alice");
    }

    #[test]
    fn reader_bot_json_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let export = dir.path().join("export.json");
        std::fs::write(
            &export,
            r#"{"messages": [
                {"id": "m1", "timestamp": "2026-02-10T09:00:00", "sender": "Alice", "content": "hi"},
                {"id": "m2", "timestamp": "2026-02-10T09:05:00", "sender": "System", "content": "joined", "is_system": true}
            ]}"#,
        )
        .unwrap();

        let result = importer(&dir)
            .import_reader_bot_json(&export, "g2", "Friends")
            .unwrap();
        assert_eq!(result.message_count, 2);
        assert_eq!(result.participant_count, 1);
        assert_eq!(result.format, ImportFormat::ReaderBot);
    }
}
