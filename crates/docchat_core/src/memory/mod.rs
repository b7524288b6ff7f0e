use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::domain::ConversationTurn;

/// Session id used by hosts that run a single conversational thread.
pub const DEFAULT_SESSION: &str = "default";

/// Bounded FIFO of prior turns for one conversation.
///
/// Holds at most `2 * window` turns; each exchange is one user turn plus one
/// assistant turn and the oldest turns are evicted first.
#[derive(Debug, Clone, Default)]
pub struct ConversationMemory {
    turns: VecDeque<ConversationTurn>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, user_text: &str, assistant_text: &str, window: usize) {
        self.turns.push_back(ConversationTurn::user(user_text));
        self.turns.push_back(ConversationTurn::assistant(assistant_text));
        let capacity = window * 2;
        while self.turns.len() > capacity {
            self.turns.pop_front();
        }
    }

    /// Chronological copy for prompt construction.
    pub fn snapshot(&self) -> Vec<ConversationTurn> {
        self.turns.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

/// Conversation memories keyed by session id, so concurrent users never share history.
#[derive(Debug, Default)]
pub struct SessionMemories {
    sessions: Mutex<HashMap<String, ConversationMemory>>,
}

impl SessionMemories {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_sessions<R>(&self, f: impl FnOnce(&mut HashMap<String, ConversationMemory>) -> R) -> R {
        let mut guard = match self.sessions.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    pub fn append(&self, session_id: &str, user_text: &str, assistant_text: &str, window: usize) {
        self.with_sessions(|s| {
            s.entry(session_id.to_string())
                .or_default()
                .append(user_text, assistant_text, window)
        })
    }

    pub fn snapshot(&self, session_id: &str) -> Vec<ConversationTurn> {
        self.with_sessions(|s| s.get(session_id).map(|m| m.snapshot()).unwrap_or_default())
    }

    pub fn len(&self, session_id: &str) -> usize {
        self.with_sessions(|s| s.get(session_id).map(|m| m.len()).unwrap_or(0))
    }

    pub fn clear(&self, session_id: &str) {
        self.with_sessions(|s| {
            s.remove(session_id);
        });
        tracing::info!(session_id, "conversation memory cleared");
    }

    pub fn session_count(&self) -> usize {
        self.with_sessions(|s| s.len())
    }
}
