use serde_json::{Map, Value};

use super::{Transcript, TranscriptEntry, NO_CONTENT, UNKNOWN_SENDER};

#[derive(Debug, thiserror::Error)]
pub enum TranscriptError {
    #[error("transcript is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("transcript JSON is not an array")]
    NotAnArray,
    #[error("transcript entry {index} is not an object")]
    EntryNotAnObject { index: usize },
}

/// Strips one optional leading ```` ```json ```` fence line (case-insensitive)
/// and one optional trailing ```` ``` ```` marker. Anything else is returned
/// untouched, so stripping is idempotent.
pub fn strip_code_fence(raw: &str) -> &str {
    let mut text = raw.trim();
    if text
        .get(..7)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("```json"))
    {
        text = text[7..].trim_start();
    }
    if let Some(stripped) = text.strip_suffix("```") {
        text = stripped.trim_end();
    }
    text
}

/// Parses a raw vision-model reply into a transcript. The reply may be bare
/// JSON or wrapped in a markdown fence. Rows missing a `sender` or `message`
/// key degrade to the fixed placeholders instead of failing the whole batch.
pub fn extract(raw: &str) -> Result<Transcript, TranscriptError> {
    let cleaned = strip_code_fence(raw);
    let parsed: Value = serde_json::from_str(cleaned)?;
    let rows = parsed.as_array().ok_or(TranscriptError::NotAnArray)?;
    rows.iter()
        .enumerate()
        .map(|(index, row)| {
            let entry = row
                .as_object()
                .ok_or(TranscriptError::EntryNotAnObject { index })?;
            Ok(entry_from_object(entry))
        })
        .collect()
}

/// Lenient variant used on the previous snapshot during diffing: empty or
/// unparsable input yields an empty transcript, and non-object rows are
/// skipped, so a corrupt snapshot can never wedge the loop.
pub fn extract_lenient(raw: &str) -> Transcript {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    let cleaned = strip_code_fence(raw);
    let Ok(parsed) = serde_json::from_str::<Value>(cleaned) else {
        return Vec::new();
    };
    let Some(rows) = parsed.as_array() else {
        return Vec::new();
    };
    rows.iter()
        .filter_map(Value::as_object)
        .map(entry_from_object)
        .collect()
}

fn entry_from_object(entry: &Map<String, Value>) -> TranscriptEntry {
    TranscriptEntry {
        sender: field_or(entry, "sender", UNKNOWN_SENDER),
        message: field_or(entry, "message", NO_CONTENT),
    }
}

fn field_or(entry: &Map<String, Value>, key: &str, placeholder: &str) -> String {
    match entry.get(key) {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => placeholder.to_string(),
        Some(other) => other.to_string(),
    }
}
