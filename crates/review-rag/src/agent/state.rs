//! Per-thread conversation state.

use serde::{Deserialize, Serialize};

use crate::llm::{ChatMessage, ChatRole};
use crate::types::{Snippet, ToolOutput};

/// Everything the agent accumulates for one conversation thread: the message
/// history plus the append-only tool-output and snippet logs. Serialized
/// wholesale into the checkpoint store after every loop transition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationState {
    pub messages: Vec<ChatMessage>,
    pub tool_outputs: Vec<ToolOutput>,
    pub snippets: Vec<Snippet>,
}

impl ConversationState {
    pub fn has_system_message(&self) -> bool {
        self.messages.iter().any(|m| m.role == ChatRole::System)
    }

    /// Text of the last assistant message, if any.
    pub fn last_answer(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::Assistant && m.content.is_some())
            .and_then(|m| m.content.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_system_message() {
        let mut state = ConversationState::default();
        assert!(!state.has_system_message());
        state.messages.push(ChatMessage::system("instructions"));
        assert!(state.has_system_message());
    }

    #[test]
    fn last_answer_skips_tool_messages() {
        let mut state = ConversationState::default();
        state.messages.push(ChatMessage::user("q"));
        state.messages.push(ChatMessage::assistant("the answer"));
        state
            .messages
            .push(ChatMessage::tool_result("id1", "retrieve_reviews", "{}"));
        assert_eq!(state.last_answer(), Some("the answer"));
    }
}
