//! Chat data passed between the manager, processors and backends.

use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

/// Execution precedence tier. Lower tiers run first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical = 0,
    High = 1,
    #[default]
    Normal = 2,
    Low = 3,
    Monitoring = 4,
}

impl Priority {
    pub const ALL: &'static [Priority] = &[
        Self::Critical,
        Self::High,
        Self::Normal,
        Self::Low,
        Self::Monitoring,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
            Self::Monitoring => "monitoring",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Request-scoped state threaded through plugins for one chat turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatContext {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Free-form values plugins may read or add.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ChatContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    /// Index of the most recent user message, if any.
    pub fn last_user_index(&self) -> Option<usize> {
        self.messages.iter().rposition(|m| m.role == Role::User)
    }

    pub fn last_user_message(&self) -> Option<&Message> {
        self.last_user_index().map(|i| &self.messages[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_user_message_skips_assistant_turns() {
        let ctx = ChatContext::new("s1")
            .with_message(Message::user("first"))
            .with_message(Message::assistant("reply"))
            .with_message(Message::user("second"))
            .with_message(Message::assistant("reply 2"));
        assert_eq!(ctx.last_user_index(), Some(2));
        assert_eq!(
            ctx.last_user_message().map(|m| m.content.as_str()),
            Some("second")
        );
    }

    #[test]
    fn empty_context_has_no_user_message() {
        let ctx = ChatContext::new("s1").with_message(Message::system("be brief"));
        assert!(ctx.last_user_message().is_none());
    }

    #[test]
    fn priority_orders_critical_first() {
        let mut tiers = vec![Priority::Monitoring, Priority::Normal, Priority::Critical];
        tiers.sort();
        assert_eq!(tiers, vec![
            Priority::Critical,
            Priority::Normal,
            Priority::Monitoring
        ]);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_value(Message::user("hi")).unwrap_or_default();
        assert_eq!(json["role"], "user");
    }
}
