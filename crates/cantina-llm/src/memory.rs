use std::collections::VecDeque;

use cantina_core::llm::{ChatMessage, ChatRole};

/// Conversation memory for one LLM session.
///
/// A bounded deque of messages under an approximate token budget. The
/// estimator is deliberately cheap: word count times 1.3. Eviction is
/// FIFO and never removes the most recent message.
pub struct SessionMemory {
    system_prompt: String,
    messages: VecDeque<ChatMessage>,
    max_tokens: usize,
    max_messages: usize,
    current_tokens: usize,
}

/// Word count scaled by the average tokens-per-word ratio.
pub fn estimate_tokens(text: &str) -> usize {
    (text.split_whitespace().count() as f64 * 1.3).ceil() as usize
}

impl SessionMemory {
    pub fn new(system_prompt: impl Into<String>, max_tokens: usize, max_messages: usize) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages: VecDeque::new(),
            max_tokens,
            max_messages,
            current_tokens: 0,
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.current_tokens += estimate_tokens(&message.content);
        self.messages.push_back(message);
        self.evict();
    }

    fn evict(&mut self) {
        while self.messages.len() > self.max_messages
            || (self.current_tokens > self.max_tokens && self.messages.len() > 1)
        {
            if let Some(removed) = self.messages.pop_front() {
                self.current_tokens = self
                    .current_tokens
                    .saturating_sub(estimate_tokens(&removed.content));
            } else {
                break;
            }
        }
    }

    /// System prompt followed by the retained conversation.
    pub fn messages_for_api(&self) -> Vec<ChatMessage> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        out.push(ChatMessage::system(self.system_prompt.clone()));
        out.extend(self.messages.iter().cloned());
        out
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn token_count(&self) -> usize {
        self.current_tokens
    }

    /// Drop the conversation, keeping the system prompt.
    pub fn reset(&mut self) {
        self.messages.clear();
        self.current_tokens = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimator_scales_word_count() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("one two three four"), 6); // ceil(4 * 1.3)
    }

    #[test]
    fn eviction_is_fifo_over_message_cap() {
        let mut memory = SessionMemory::new("sys", 10_000, 3);
        for i in 0..5 {
            memory.push(ChatMessage::user(format!("message {i}")));
        }
        assert_eq!(memory.len(), 3);
        let api = memory.messages_for_api();
        assert_eq!(api[0].role, ChatRole::System);
        assert_eq!(api[1].content, "message 2");
        assert_eq!(api[3].content, "message 4");
    }

    #[test]
    fn token_budget_evicts_but_keeps_latest() {
        let mut memory = SessionMemory::new("sys", 5, 100);
        memory.push(ChatMessage::user("a b c d e f g h"));
        memory.push(ChatMessage::user("i j k l m n o p"));
        // Both exceed the budget; only the newest survives.
        assert_eq!(memory.len(), 1);
        assert_eq!(memory.messages_for_api()[1].content, "i j k l m n o p");
    }

    #[test]
    fn reset_clears_conversation_not_system_prompt() {
        let mut memory = SessionMemory::new("persona", 1_000, 10);
        memory.push(ChatMessage::user("hello"));
        memory.reset();
        assert!(memory.is_empty());
        assert_eq!(memory.token_count(), 0);
        assert_eq!(memory.messages_for_api()[0].content, "persona");
    }
}
