//! Built-in default prompts. Each can be overridden from the command line.

/// Sent to the vision model alongside the captured region.
pub const READ_SCREEN_PROMPT: &str = "\
The attached image is a cropped screenshot of a chat window. Transcribe every \
visible message into a JSON array, ordered top to bottom. Each element must be \
an object with exactly two string fields: \"sender\" (the display name next to \
the message) and \"message\" (the message text, verbatim). Do not invent \
messages, do not merge messages, and do not add commentary. Reply with the \
JSON array only.";

/// Persona and protocol for the text model.
pub const CHAT_SYSTEM_PROMPT: &str = "\
You are reading a friend's chat through their screen and answering on their \
behalf. You will receive new messages as lines of the form sender:message. \
Write the reply exactly as it should be typed into the chat box, with no \
quoting and no sender prefix. If no reply should be sent, answer with [reject]. \
If the conversation is over and the watcher should shut down, answer with \
[quit]. Keep replies short and natural.";

/// System prompt for the summarize-and-clear request.
pub const SUMMARIZE_PROMPT: &str = "\
Condense the conversation so far into a short plain-text summary that keeps \
the participants, any decisions or open questions, and the current tone. The \
summary replaces the full history as long-term memory, so keep everything a \
future reply would need and nothing else.";
