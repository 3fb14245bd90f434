//! Parsing of the text model's reply: the optional leading thinking block
//! and the action directive embedded in the answer.

const THINK_OPEN: &str = "<think>\n";
const THINK_CLOSE: &str = "</think>\n\n";

pub const QUIT_DIRECTIVE: &str = "[quit]";
pub const REJECT_DIRECTIVE: &str = "[reject]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReply {
    pub thinking: String,
    pub answer: String,
}

/// Splits a reply into its thinking block and answer. The block is the text
/// between the literal `<think>\n` and `</think>\n\n` markers; when either
/// marker is absent or they appear out of order, the entire reply is the
/// answer and thinking is empty.
pub fn split_think(raw: &str) -> ParsedReply {
    match (raw.find(THINK_OPEN), raw.find(THINK_CLOSE)) {
        (Some(open), Some(close)) if open < close => ParsedReply {
            thinking: raw[open + THINK_OPEN.len()..close].to_string(),
            answer: raw[close + THINK_CLOSE.len()..].to_string(),
        },
        _ => ParsedReply {
            thinking: String::new(),
            answer: raw.to_string(),
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyDirective {
    /// Terminate the process.
    Quit,
    /// Perform no UI action.
    Reject,
    /// Deliver the answer verbatim.
    Say(String),
}

/// Classifies an answer: `[quit]` anywhere terminates, `[reject]` anywhere
/// suppresses the reply, anything else is delivered as-is.
pub fn parse_directive(answer: &str) -> ReplyDirective {
    if answer.contains(QUIT_DIRECTIVE) {
        return ReplyDirective::Quit;
    }
    if answer.contains(REJECT_DIRECTIVE) {
        return ReplyDirective::Reject;
    }
    ReplyDirective::Say(answer.to_string())
}

#[cfg(test)]
mod tests {
    use super::{parse_directive, split_think, ReplyDirective};

    #[test]
    fn split_extracts_thinking_and_answer() {
        let parsed = split_think("<think>\nweighing options\n</think>\n\nhello there");
        assert_eq!(parsed.thinking, "weighing options\n");
        assert_eq!(parsed.answer, "hello there");
    }

    #[test]
    fn missing_markers_mean_the_whole_reply_is_the_answer() {
        let parsed = split_think("just a plain reply");
        assert!(parsed.thinking.is_empty());
        assert_eq!(parsed.answer, "just a plain reply");
    }

    #[test]
    fn out_of_order_markers_fall_back_to_plain_answer() {
        let raw = "</think>\n\nbackwards<think>\n";
        let parsed = split_think(raw);
        assert!(parsed.thinking.is_empty());
        assert_eq!(parsed.answer, raw);
    }

    #[test]
    fn partial_close_marker_is_not_a_split_point() {
        let raw = "<think>\nno blank line after close</think>\ntail";
        let parsed = split_think(raw);
        assert!(parsed.thinking.is_empty());
        assert_eq!(parsed.answer, raw);
    }

    #[test]
    fn quit_directive_wins_anywhere_in_the_answer() {
        assert_eq!(parse_directive("[quit] bye"), ReplyDirective::Quit);
        assert_eq!(parse_directive("so long, [quit]"), ReplyDirective::Quit);
    }

    #[test]
    fn reject_directive_suppresses_the_reply() {
        assert_eq!(parse_directive("[reject]"), ReplyDirective::Reject);
    }

    #[test]
    fn plain_answers_are_delivered_verbatim() {
        assert_eq!(
            parse_directive("on my way"),
            ReplyDirective::Say("on my way".to_string())
        );
    }
}
