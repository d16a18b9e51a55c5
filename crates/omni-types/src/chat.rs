use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::message::{Message, Role};

/// Title every chat starts with until the first user message names it.
pub const DEFAULT_CHAT_TITLE: &str = "New Chat";

/// Maximum number of characters kept when deriving a title.
pub const TITLE_MAX_CHARS: usize = 50;

/// A persisted conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Chat {
    pub fn new(id: String) -> Self {
        let now = crate::now_millis();
        Self {
            id,
            title: DEFAULT_CHAT_TITLE.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_default_title(&self) -> bool {
        self.title == DEFAULT_CHAT_TITLE
    }

    /// Refresh `updated_at`, never moving it backwards.
    pub fn touch(&mut self) {
        self.updated_at = crate::now_millis().max(self.updated_at);
    }

    /// Append keeping insertion order. The first user message names an
    /// untitled chat; later messages never rename it.
    pub fn push_message(&mut self, message: Message) {
        let first = self.messages.is_empty();
        if first && message.role == Role::User && self.has_default_title() {
            self.title = derive_title(&message.content);
        }
        self.messages.push(message);
        self.touch();
    }

    /// Messages shown to a person (system messages excluded).
    pub fn transcript(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.is_visible())
    }

    /// Case-insensitive substring match against the title or any message.
    pub fn matches(&self, query: &str) -> bool {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        self.title.to_lowercase().contains(&needle)
            || self
                .messages
                .iter()
                .any(|m| m.content.to_lowercase().contains(&needle))
    }

    /// Every tool message answers a call made by an earlier assistant message.
    pub fn tool_links_valid(&self) -> bool {
        let mut seen: HashSet<&str> = HashSet::new();
        for message in &self.messages {
            match message.role {
                Role::Assistant => {
                    seen.extend(message.tool_calls.iter().map(|c| c.id.as_str()));
                }
                Role::Tool => match message.tool_call_id.as_deref() {
                    Some(id) if seen.contains(id) => {}
                    _ => return false,
                },
                _ => {}
            }
        }
        true
    }

    pub fn summary(&self) -> ChatSummary {
        ChatSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            updated_at: self.updated_at,
            message_count: self.messages.len(),
        }
    }
}

/// Summary of a chat for listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: String,
    pub title: String,
    pub updated_at: i64,
    pub message_count: usize,
}

/// Title from the first user message: trimmed, cut to `TITLE_MAX_CHARS`.
pub fn derive_title(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return DEFAULT_CHAT_TITLE.to_string();
    }
    trimmed.chars().take(TITLE_MAX_CHARS).collect()
}

/// Time component plus a random suffix. Collisions are not handled.
pub fn new_chat_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("chat_{}_{}", crate::now_millis(), &suffix[..9])
}
