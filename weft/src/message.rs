//! Minimal message types for agent conversations.
//!
//! Message roles: System (usually first in the list), User, Assistant.
//! Tool results are carried as User messages in the fixed form
//! `Tool <name> returned: <text>` so compaction can recognize and keep
//! call/result pairs intact.

/// A single message in an agent conversation.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Message {
    /// System prompt or injected context; typically placed first in the list.
    System(String),
    /// User input, including tool results in the `Tool … returned:` form.
    User(String),
    /// Model/agent reply.
    Assistant(String),
}

impl Message {
    /// Creates a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::System(content.into())
    }

    /// Creates a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::User(content.into())
    }

    /// Creates an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant(content.into())
    }

    /// Creates the User message carrying a tool result.
    pub fn tool_result(tool: &str, text: &str) -> Self {
        Self::User(format!("Tool {} returned: {}", tool, text))
    }

    /// True if this is a User message in tool-result form.
    pub fn is_tool_result(&self) -> bool {
        match self {
            Message::User(s) => s.starts_with("Tool ") && s.contains(" returned: "),
            _ => false,
        }
    }

    /// The message text, regardless of role.
    pub fn content(&self) -> &str {
        match self {
            Message::System(s) | Message::User(s) | Message::Assistant(s) => s,
        }
    }
}

/// Approximate characters per token for English/mixed text.
const CHARS_PER_TOKEN: usize = 4;

/// Heuristic token estimate over a message list: ~4 characters per token.
pub fn estimate_tokens(messages: &[Message]) -> u32 {
    let total: usize = messages.iter().map(|m| m.content().len()).sum();
    (total / CHARS_PER_TOKEN) as u32
}

/// Heuristic token estimate for a single string.
pub fn estimate_text_tokens(text: &str) -> u32 {
    (text.len() / CHARS_PER_TOKEN) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: system/user/assistant constructors produce the correct variant with content.
    #[test]
    fn message_constructors() {
        assert!(matches!(Message::system("s"), Message::System(c) if c == "s"));
        assert!(matches!(Message::user("u"), Message::User(c) if c == "u"));
        assert!(matches!(Message::assistant("a"), Message::Assistant(c) if c == "a"));
    }

    /// **Scenario**: tool_result produces the fixed form recognized by is_tool_result.
    #[test]
    fn tool_result_round_trip() {
        let m = Message::tool_result("grep", "3 matches");
        assert!(m.is_tool_result());
        assert_eq!(m.content(), "Tool grep returned: 3 matches");
        assert!(!Message::user("plain").is_tool_result());
        assert!(!Message::assistant("Tool x returned: y").is_tool_result());
    }

    /// **Scenario**: Each Message variant round-trips through serde.
    #[test]
    fn message_serde_round_trip() {
        for msg in [
            Message::system("sys"),
            Message::user("usr"),
            Message::assistant("ast"),
        ] {
            let json = serde_json::to_string(&msg).expect("serialize");
            let back: Message = serde_json::from_str(&json).expect("deserialize");
            assert_eq!(msg, back);
        }
    }

    /// **Scenario**: estimate_tokens is total chars / 4.
    #[test]
    fn estimate_tokens_heuristic() {
        let msgs = vec![Message::user("abcd".repeat(10))]; // 40 chars
        assert_eq!(estimate_tokens(&msgs), 10);
        assert_eq!(estimate_text_tokens("abcdefgh"), 2);
    }
}
