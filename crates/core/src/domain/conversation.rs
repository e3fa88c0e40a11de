use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::intent::IntentKind;
use crate::domain::order::Order;
use crate::domain::product::ProductId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Self::User),
            "assistant" | "bot" => Some(Self::Assistant),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub intent: Option<IntentKind>,
}

impl ConversationMessage {
    pub fn user(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self { role: MessageRole::User, content: content.into(), timestamp, intent: None }
    }

    pub fn assistant(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self { role: MessageRole::Assistant, content: content.into(), timestamp, intent: None }
    }

    pub fn with_intent(mut self, intent: IntentKind) -> Self {
        self.intent = Some(intent);
        self
    }
}

/// Short-term state for one user, oldest message first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub user_id: String,
    pub messages: Vec<ConversationMessage>,
    pub shown_products: Vec<ProductId>,
    pub recent_orders: Vec<Order>,
    pub last_updated: DateTime<Utc>,
}

impl ConversationSnapshot {
    pub fn empty(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            messages: Vec::new(),
            shown_products: Vec::new(),
            recent_orders: Vec::new(),
            last_updated: now,
        }
    }

    /// The last `limit` messages, oldest first.
    pub fn window(&self, limit: usize) -> &[ConversationMessage] {
        let start = self.messages.len().saturating_sub(limit);
        &self.messages[start..]
    }

    /// Assistant messages among the last `limit`, most recent first.
    pub fn recent_assistant_messages(
        &self,
        limit: usize,
    ) -> impl Iterator<Item = &ConversationMessage> {
        self.window(limit).iter().rev().filter(|message| message.role == MessageRole::Assistant)
    }

    pub fn has_recent_orders(&self) -> bool {
        !self.recent_orders.is_empty()
    }

    pub fn push_shown_products(&mut self, products: &[ProductId], keep: usize) {
        self.shown_products.extend(products.iter().cloned());
        let overflow = self.shown_products.len().saturating_sub(keep);
        self.shown_products.drain(..overflow);
    }
}
