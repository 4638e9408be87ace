//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token. Good enough
//! for budgeting; the provider's own count is what ends up in `Usage`.

use repolens_core::message::Message;

/// Per-message overhead for role name, delimiters and formatting markers.
pub const MESSAGE_OVERHEAD: usize = 4;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 bytes. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Tokens spent on a message's tool calls (name plus serialized arguments).
pub fn estimate_tool_call_tokens(message: &Message) -> usize {
    message
        .tool_calls
        .iter()
        .map(|tc| estimate_tokens(&tc.function_name) + estimate_tokens(&tc.arguments.to_string()))
        .sum()
}

/// Estimate tokens for a single message including per-message overhead.
pub fn estimate_message_tokens(message: &Message) -> usize {
    MESSAGE_OVERHEAD + estimate_tokens(&message.content) + estimate_tool_call_tokens(message)
}

/// Estimate tokens for a slice of messages.
pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use repolens_core::tool::ToolCall;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(estimate_tokens("test"), 1);
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn message_includes_overhead() {
        let msg = Message::user("test"); // 1 token + 4 overhead
        assert_eq!(estimate_message_tokens(&msg), 5);
    }

    #[test]
    fn tool_calls_are_counted() {
        let msg = Message::assistant_with_tools(
            "",
            vec![ToolCall {
                id: "call_0".into(),
                function_name: "calculate".into(), // 9 bytes → 3 tokens
                arguments: serde_json::json!({"expression": "2+3*4"}), // 22 bytes → 6 tokens
            }],
        );
        assert_eq!(estimate_message_tokens(&msg), 4 + 3 + 6);
    }

    #[test]
    fn multiple_messages() {
        let msgs = vec![Message::user("hello"), Message::assistant("world")];
        assert_eq!(estimate_messages_tokens(&msgs), 12);
    }
}
