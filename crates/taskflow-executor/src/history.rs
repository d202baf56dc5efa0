//! Per-session rolling conversation history, capped at 20 entries
//! (10 user+assistant pairs) — spec §4.5.

use std::collections::{HashMap, VecDeque};

use tokio::sync::Mutex;

const MAX_ENTRIES: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// State machine per session: `empty -> populated -> trimmed`, monotonically
/// rebuilt; cleared only via an explicit API call.
#[derive(Default)]
pub struct ConversationHistories {
    by_session: Mutex<HashMap<String, VecDeque<ChatMessage>>>,
}

impl ConversationHistories {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_user(&self, session_id: &str, content: String) {
        self.push(session_id, Role::User, content).await;
    }

    pub async fn push_assistant(&self, session_id: &str, content: String) {
        self.push(session_id, Role::Assistant, content).await;
    }

    async fn push(&self, session_id: &str, role: Role, content: String) {
        let mut map = self.by_session.lock().await;
        let entry = map.entry(session_id.to_string()).or_default();
        entry.push_back(ChatMessage { role, content });
        while entry.len() > MAX_ENTRIES {
            entry.pop_front();
        }
    }

    pub async fn get(&self, session_id: &str) -> Vec<ChatMessage> {
        self.by_session
            .lock()
            .await
            .get(session_id)
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn clear(&self, session_id: &str) {
        self.by_session.lock().await.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_history_caps_at_twenty_entries() {
        let hist = ConversationHistories::new();
        for i in 0..15 {
            hist.push_user("s1", format!("u{i}")).await;
            hist.push_assistant("s1", format!("a{i}")).await;
        }
        let entries = hist.get("s1").await;
        assert_eq!(entries.len(), 20);
        assert_eq!(entries[0].content, "u10");
        assert_eq!(entries.last().unwrap().content, "a14");
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let hist = ConversationHistories::new();
        hist.push_user("s1", "hi".into()).await;
        hist.push_user("s2", "yo".into()).await;
        assert_eq!(hist.get("s1").await.len(), 1);
        assert_eq!(hist.get("s2").await.len(), 1);
    }

    #[tokio::test]
    async fn test_clear_resets_session() {
        let hist = ConversationHistories::new();
        hist.push_user("s1", "hi".into()).await;
        hist.clear("s1").await;
        assert!(hist.get("s1").await.is_empty());
    }
}
