//! Bounded conversational memory for session clients.
//!
//! Keeps the system prompt plus a sliding window of the most recent
//! messages. The window is counted in messages, not tokens, so a hydrated
//! client and a long-lived one see the same amount of history.

use crate::db::ConversationTurn;
use crate::llm::Message;
use sdk::types::TurnRole;
use std::collections::VecDeque;

/// Default number of messages kept in the window
pub const DEFAULT_WINDOW: usize = 20;

#[derive(Debug, Clone)]
pub struct ChatMemory {
    system_prompt: Option<Message>,
    window: VecDeque<Message>,
    max_messages: usize,
}

impl ChatMemory {
    /// A zero window is clamped to one message.
    pub fn new(system_prompt: Option<Message>, max_messages: usize) -> Self {
        let max_messages = max_messages.max(1);
        Self {
            system_prompt,
            window: VecDeque::with_capacity(max_messages),
            max_messages,
        }
    }

    /// Replay stored turns, oldest first, into a fresh memory.
    pub fn hydrated(
        system_prompt: Option<Message>,
        max_messages: usize,
        turns: &[ConversationTurn],
    ) -> Self {
        let mut memory = Self::new(system_prompt, max_messages);
        for turn in turns {
            memory.add(match turn.role {
                TurnRole::User => Message::user(&turn.message),
                TurnRole::Assistant => Message::assistant(&turn.message),
            });
        }
        memory
    }

    /// Append a message, dropping the oldest ones beyond the window.
    pub fn add(&mut self, message: Message) {
        self.window.push_back(message);
        while self.window.len() > self.max_messages {
            self.window.pop_front();
        }
    }

    /// System prompt followed by the window, ready to send.
    pub fn messages(&self) -> Vec<Message> {
        self.system_prompt
            .iter()
            .chain(self.window.iter())
            .cloned()
            .collect()
    }

    /// Messages in the window, excluding the system prompt
    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MessageRole;
    use sdk::types::AppId;

    fn turn(id: i64, role: TurnRole, text: &str) -> ConversationTurn {
        ConversationTurn {
            id,
            app_id: AppId(1),
            role,
            message: text.to_string(),
            created_at: id,
        }
    }

    #[test]
    fn test_window_drops_oldest() {
        let mut memory = ChatMemory::new(Some(Message::system("sys")), 3);
        for i in 0..5 {
            memory.add(Message::user(format!("m{}", i)));
        }

        let messages = memory.messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, MessageRole::System);
        assert_eq!(messages[1].content, "m2");
        assert_eq!(messages[3].content, "m4");
    }

    #[test]
    fn test_hydration_preserves_order_and_roles() {
        let turns = vec![
            turn(1, TurnRole::User, "make a todo app"),
            turn(2, TurnRole::Assistant, "```html\n<ul></ul>\n```"),
            turn(3, TurnRole::User, "add a button"),
        ];
        let memory = ChatMemory::hydrated(None, DEFAULT_WINDOW, &turns);

        let messages = memory.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[2].content, "add a button");
    }

    #[test]
    fn test_zero_window_clamped() {
        let mut memory = ChatMemory::new(None, 0);
        memory.add(Message::user("a"));
        memory.add(Message::user("b"));
        assert_eq!(memory.len(), 1);
        assert_eq!(memory.max_messages(), 1);
    }
}
