use serde::{Deserialize, Serialize};

use crate::domain::draft::Draft;
use crate::domain::intent::IntentLabel;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// Who the turn is acting for. Collaborators key credentials and stores on `user_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub user_id: String,
    pub email: Option<String>,
}

impl UserIdentity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), email: None }
    }
}

/// Cross-turn conversation state. Owned by the caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationSession {
    pub id: SessionId,
    pub active_intent: Option<IntentLabel>,
    pub pending_draft: Option<Draft>,
    pub history: Vec<ChatMessage>,
}

impl ConversationSession {
    pub fn new(id: SessionId) -> Self {
        Self { id, active_intent: None, pending_draft: None, history: Vec::new() }
    }

    /// Non-blank history entries, oldest first.
    pub fn transcript(&self) -> impl Iterator<Item = &ChatMessage> {
        self.history.iter().filter(|message| !message.is_blank())
    }

    /// The last `count` non-blank entries, oldest first.
    pub fn recent(&self, count: usize) -> Vec<ChatMessage> {
        let transcript: Vec<&ChatMessage> = self.transcript().collect();
        let start = transcript.len().saturating_sub(count);
        transcript[start..].iter().map(|message| (*message).clone()).collect()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.history.push(message);
    }

    /// Drops the oldest entries so at most `window` remain.
    pub fn trim_history(&mut self, window: usize) {
        if self.history.len() > window {
            let excess = self.history.len() - window;
            self.history.drain(..excess);
        }
    }

    pub fn clear_pending(&mut self) {
        self.pending_draft = None;
    }
}

#[cfg(test)]
mod tests {
    use super::{ChatMessage, ConversationSession, Role, SessionId};

    fn session_with(messages: &[(&str, &str)]) -> ConversationSession {
        let mut session = ConversationSession::new(SessionId::new("s-1"));
        for (role, content) in messages {
            let role = if *role == "user" { Role::User } else { Role::Assistant };
            session.push(ChatMessage::new(role, *content));
        }
        session
    }

    #[test]
    fn recent_skips_blank_entries_and_keeps_order() {
        let session = session_with(&[
            ("user", "one"),
            ("assistant", "  "),
            ("user", "two"),
            ("assistant", "three"),
        ]);

        let recent = session.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "two");
        assert_eq!(recent[1].content, "three");
        assert_eq!(session.recent(10).len(), 3);
    }

    #[test]
    fn trim_history_drops_oldest_entries() {
        let mut session =
            session_with(&[("user", "a"), ("assistant", "b"), ("user", "c"), ("assistant", "d")]);
        session.trim_history(2);

        let contents: Vec<_> = session.history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["c", "d"]);
    }

    #[test]
    fn roles_serialize_lowercase() {
        let json = serde_json::to_string(&ChatMessage::assistant("hi")).expect("serialize");
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }
}
