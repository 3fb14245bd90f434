mod diff;
mod extract;

pub use diff::{diff_transcripts, format_lines, parse_lines};
pub use extract::{extract, extract_lenient, strip_code_fence, TranscriptError};

use serde::{Deserialize, Serialize};

/// Placeholder substituted when a transcript row carries no sender.
pub const UNKNOWN_SENDER: &str = "[unknown sender]";
/// Placeholder substituted when a transcript row carries no message body.
pub const NO_CONTENT: &str = "[no content]";

/// One chat message as transcribed by the vision model. Identity is the
/// `(sender, message)` pair itself; there is no separate id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub sender: String,
    pub message: String,
}

impl TranscriptEntry {
    pub fn new(sender: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            message: message.into(),
        }
    }
}

/// Ordered list of transcribed messages. Insertion order matters for output
/// formatting only; diffing treats it as a set keyed by the pair.
pub type Transcript = Vec<TranscriptEntry>;
