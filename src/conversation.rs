use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A conversation shared between a session and the responder writing to it.
pub type SharedConversation = Arc<Mutex<Conversation>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message exchanged in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Append-only history of one provider track.
///
/// Turns always alternate user → assistant; the only way to grow a
/// conversation is [`Conversation::record_exchange`], which appends both
/// halves at once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a conversation from prior (user, assistant) exchanges.
    #[cfg(test)]
    pub fn from_exchanges<I, U, A>(exchanges: I) -> Self
    where
        I: IntoIterator<Item = (U, A)>,
        U: Into<String>,
        A: Into<String>,
    {
        let mut c = Self::new();
        for (user, assistant) in exchanges {
            c.record_exchange(user, assistant);
        }
        c
    }

    pub fn shared(self) -> SharedConversation {
        Arc::new(Mutex::new(self))
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn record_exchange(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        self.turns.push(Turn::user(user));
        self.turns.push(Turn::assistant(assistant));
    }

    /// Message list for the next request: optional system turn, prior turns
    /// in order, then the new user turn.
    pub fn outbound(&self, system_prompt: Option<&str>, message: &str) -> Vec<Turn> {
        let mut out = Vec::with_capacity(self.turns.len() + 2);
        if let Some(sys) = system_prompt {
            out.push(Turn::system(sys));
        }
        out.extend(self.turns.iter().cloned());
        out.push(Turn::user(message));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_puts_system_first_and_new_message_last() {
        let c = Conversation::from_exchanges([("hi", "hello there")]);
        let msgs = c.outbound(Some("be nice"), "how are you?");

        let roles: Vec<Role> = msgs.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
        assert_eq!(msgs[0].content, "be nice");
        assert_eq!(msgs[3].content, "how are you?");
    }

    #[test]
    fn outbound_without_system_prompt() {
        let c = Conversation::new();
        let msgs = c.outbound(None, "ping");
        assert_eq!(msgs, vec![Turn::user("ping")]);
    }

    #[test]
    fn exchanges_alternate_user_then_assistant() {
        let mut c = Conversation::new();
        for i in 0..3 {
            c.record_exchange(format!("q{i}"), format!("a{i}"));
            assert_eq!(c.len(), 2 * (i + 1));
        }
        for pair in c.turns().chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
        }
    }

    #[test]
    fn roles_serialize_lowercase() {
        let json = serde_json::to_string(&Turn::assistant("x")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"x"}"#);
    }
}
