//! Chat history view used by a UI: the selected chat, a recency-ordered
//! listing and search. The listing is a projection of the repository and is
//! reloaded whenever the chat collection changes in the store, including
//! writes from other contexts.
//!
//! Nothing is auto-selected: a fresh history has no current chat until the
//! caller selects or creates one.

use std::rc::Rc;

use omni_types::{Result, chat::Chat, event::StorageChange};

use crate::event_bus::Subscription;
use crate::repository::{filter_chats, sort_by_recency, ConversationRepository, CHATS_KEY};

pub struct ChatHistory {
    repository: Rc<ConversationRepository>,
    changes: Subscription<StorageChange>,
    chats: Vec<Chat>,
    current_id: Option<String>,
}

impl ChatHistory {
    pub async fn load(repository: Rc<ConversationRepository>) -> Self {
        // Only whether the chat key changed matters, not how often.
        let changes = repository.subscribe_changes().coalescing();
        let mut history = Self {
            repository,
            changes,
            chats: Vec::new(),
            current_id: None,
        };
        history.reload().await;
        history
    }

    pub async fn reload(&mut self) {
        let mut chats = self.repository.list_chats().await;
        sort_by_recency(&mut chats);
        self.chats = chats;
    }

    /// Apply pending store notifications. Returns true if the listing was reloaded.
    pub async fn sync(&mut self) -> bool {
        let touched = self
            .changes
            .drain()
            .iter()
            .any(|change| change.affects(CHATS_KEY));
        if touched {
            self.reload().await;
        }
        touched
    }

    /// Most recent first.
    pub fn chats(&self) -> &[Chat] {
        &self.chats
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current_id.as_deref()
    }

    pub fn select(&mut self, id: Option<String>) {
        self.current_id = id;
    }

    /// The listing may lag behind the store; fall back to a direct lookup
    /// before concluding the chat is gone.
    pub async fn current_chat(&self) -> Option<Chat> {
        let id = self.current_id.as_deref()?;
        if let Some(chat) = self.chats.iter().find(|c| c.id == id) {
            return Some(chat.clone());
        }
        let found = self.repository.get_chat(id).await;
        if found.is_none() {
            log::debug!("Current chat '{}' not found in store", id);
        }
        found
    }

    pub async fn new_chat(&mut self) -> Result<Chat> {
        let chat = self.repository.create_chat().await?;
        self.current_id = Some(chat.id.clone());
        self.reload().await;
        Ok(chat)
    }

    pub async fn delete(&mut self, id: &str) -> Result<()> {
        self.repository.delete_chat(id).await?;
        if self.current_id.as_deref() == Some(id) {
            self.current_id = None;
        }
        self.reload().await;
        Ok(())
    }

    pub async fn clear(&mut self) -> Result<()> {
        self.repository.clear_all().await?;
        self.current_id = None;
        self.chats.clear();
        Ok(())
    }

    /// Search over the full listing, most recent first.
    pub fn filtered(&self, query: &str) -> Vec<Chat> {
        filter_chats(self.chats.clone(), query)
    }
}
