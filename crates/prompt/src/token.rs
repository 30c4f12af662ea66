//! Token estimation.
//!
//! Character heuristic: one token is about four characters. Good enough to
//! compare layers and watch the prompt grow; the backend's usage report is
//! the real count.

use seedkeeper_core::ChatMessage;

/// Estimate the token count for a string. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Each chat message costs a few tokens of framing on top of its content.
pub fn estimate_message_tokens(message: &ChatMessage) -> usize {
    4 + estimate_tokens(&message.content)
}

pub fn estimate_messages_tokens(messages: &[ChatMessage]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn counts_characters_not_bytes() {
        // Four multi-byte characters are still one token.
        assert_eq!(estimate_tokens("🌱🌱🌱🌱"), 1);
    }

    #[test]
    fn messages_include_overhead() {
        let msgs = vec![ChatMessage::user("hello"), ChatMessage::assistant("world")];
        assert_eq!(estimate_messages_tokens(&msgs), 12);
    }
}
