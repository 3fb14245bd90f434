use serde_json::Value;

use super::{RequestBuilder, Role, Turn};

/// Size budget for the accumulated turn texts, in characters. This is an
/// approximation of the model's token budget, not a true token count.
pub const DEFAULT_CHAR_BUDGET: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummarizeOutcome {
    /// Buffer below the size budget; nothing happened.
    Skipped,
    /// Turns condensed into the rolling memory and cleared.
    Summarized,
    /// The collaborator failed; the live buffer was left untouched.
    Failed(String),
}

/// The rolling conversation context for the text model: accumulated turns,
/// the last summary (`memory`), and the static system prompt. Created once
/// at process start; nothing here outlives the process.
#[derive(Debug, Clone)]
pub struct ConversationBuffer {
    model: String,
    stream: bool,
    system_prompt: String,
    memory: String,
    turns: Vec<Turn>,
    char_budget: usize,
}

impl ConversationBuffer {
    pub fn new(model: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            stream: false,
            system_prompt: system_prompt.into(),
            memory: String::new(),
            turns: Vec::new(),
            char_budget: DEFAULT_CHAR_BUDGET,
        }
    }

    pub fn with_char_budget(mut self, char_budget: usize) -> Self {
        self.char_budget = char_budget;
        self
    }

    pub fn set_stream(&mut self, stream: bool) {
        self.stream = stream;
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::new(Role::User, text));
    }

    pub fn push_user_with_image(&mut self, text: impl Into<String>, image_b64: impl Into<String>) {
        self.turns
            .push(Turn::with_images(Role::User, text, vec![image_b64.into()]));
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::new(Role::Assistant, text));
    }

    pub fn memory(&self) -> &str {
        &self.memory
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Total characters across the accumulated turn texts.
    pub fn content_len(&self) -> usize {
        self.turns.iter().map(|turn| turn.text.chars().count()).sum()
    }

    /// Assembles the live request: one synthesized system turn (static
    /// prompt and current memory joined by a blank line, omitted entirely
    /// when both are blank) followed by the accumulated turns in order.
    pub fn build(&self) -> Value {
        let mut builder = RequestBuilder::new(&self.model).stream(self.stream);
        let system = self.system_text();
        if !system.trim().is_empty() {
            builder.push_system(system);
        }
        for turn in &self.turns {
            builder.push_turn(turn.clone());
        }
        builder.build()
    }

    fn system_text(&self) -> String {
        match (self.system_prompt.is_empty(), self.memory.is_empty()) {
            (false, false) => format!("{}\n\n{}", self.system_prompt, self.memory),
            (false, true) => self.system_prompt.clone(),
            (true, false) => self.memory.clone(),
            (true, true) => String::new(),
        }
    }

    /// Condenses the conversation once it outgrows the character budget.
    ///
    /// The summarization request is a value snapshot of the current turns
    /// under the dedicated prompt; it shares no storage with the live
    /// buffer. On success `memory` is replaced with the raw response and the
    /// turns are cleared. On failure both are left untouched and the error
    /// is reported in the outcome, never raised.
    pub fn maybe_summarize_and_clear<F>(
        &mut self,
        summarize_prompt: &str,
        query: F,
    ) -> SummarizeOutcome
    where
        F: FnOnce(&Value) -> anyhow::Result<String>,
    {
        if self.content_len() < self.char_budget {
            return SummarizeOutcome::Skipped;
        }

        let mut snapshot = RequestBuilder::new(&self.model);
        snapshot.push_system(summarize_prompt);
        for turn in &self.turns {
            match turn.role {
                Role::User | Role::Assistant => {
                    snapshot.push_turn(turn.clone());
                }
                Role::System => {}
            }
        }

        match query(&snapshot.build()) {
            Ok(summary) => {
                self.memory = summary;
                self.turns.clear();
                SummarizeOutcome::Summarized
            }
            Err(err) => SummarizeOutcome::Failed(format!("{err:#}")),
        }
    }
}
