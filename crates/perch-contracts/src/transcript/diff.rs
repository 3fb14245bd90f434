use std::collections::HashSet;

use super::{Transcript, TranscriptEntry};

/// Returns the entries of `current` whose `(sender, message)` pair does not
/// appear anywhere in `previous`, preserving `current`'s relative order.
/// Duplicates inside `current` are kept as-is; only membership in `previous`
/// excludes an entry.
pub fn diff_transcripts(current: &[TranscriptEntry], previous: &[TranscriptEntry]) -> Transcript {
    let seen: HashSet<(&str, &str)> = previous
        .iter()
        .map(|entry| (entry.sender.as_str(), entry.message.as_str()))
        .collect();
    current
        .iter()
        .filter(|entry| !seen.contains(&(entry.sender.as_str(), entry.message.as_str())))
        .cloned()
        .collect()
}

/// Renders a transcript as newline-joined `sender:message` lines for the
/// next user turn. An empty transcript renders as an empty string, which the
/// driver treats as "no new messages".
pub fn format_lines(transcript: &[TranscriptEntry]) -> String {
    transcript
        .iter()
        .map(|entry| format!("{}:{}", entry.sender, entry.message))
        .collect::<Vec<String>>()
        .join("\n")
}

/// Inverse of [`format_lines`] for fields free of colons and newlines: each
/// non-empty line splits at its first colon. Lines without a colon become a
/// message with an empty sender.
pub fn parse_lines(text: &str) -> Transcript {
    text.lines()
        .filter(|line| !line.is_empty())
        .map(|line| match line.split_once(':') {
            Some((sender, message)) => TranscriptEntry::new(sender, message),
            None => TranscriptEntry::new("", line),
        })
        .collect()
}
