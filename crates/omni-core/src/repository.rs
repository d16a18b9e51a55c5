//! Conversation repository: CRUD and queries over persisted chats.
//!
//! The store is the source of truth. Every operation re-reads the chat
//! collection before writing it back, so writes made by another context
//! since our last read are not lost. There is no cross-context lock:
//! two contexts editing the same chat at once resolve last-writer-wins.

use std::rc::Rc;

use omni_types::{
    Result,
    chat::{self, Chat, ChatSummary},
    event::StorageChange,
    message::Message,
};

use crate::collection::JsonCollection;
use crate::event_bus::Subscription;
use crate::ports::StoragePort;

pub const CHATS_KEY: &str = "omni:chats";
pub const DEFAULT_MAX_CHATS: usize = 50;

pub struct ConversationRepository {
    chats: JsonCollection<Chat>,
    max_chats: usize,
}

impl ConversationRepository {
    pub fn new(storage: Rc<dyn StoragePort>) -> Self {
        Self::with_capacity(storage, DEFAULT_MAX_CHATS)
    }

    pub fn with_capacity(storage: Rc<dyn StoragePort>, max_chats: usize) -> Self {
        Self {
            chats: JsonCollection::new(storage, CHATS_KEY),
            max_chats: max_chats.max(1),
        }
    }

    pub fn max_chats(&self) -> usize {
        self.max_chats
    }

    pub fn subscribe_changes(&self) -> Subscription<StorageChange> {
        self.chats.storage().subscribe_changes()
    }

    pub fn new_chat_id() -> String {
        chat::new_chat_id()
    }

    pub fn derive_title(text: &str) -> String {
        chat::derive_title(text)
    }

    /// All chats, as stored.
    pub async fn list_chats(&self) -> Vec<Chat> {
        self.chats.load().await
    }

    pub async fn get_chat(&self, id: &str) -> Option<Chat> {
        self.chats.load().await.into_iter().find(|c| c.id == id)
    }

    /// Upsert by id, then keep only the `max_chats` most recently updated.
    /// Evicted chats are dropped silently; no delete side effects run.
    pub async fn save_chat(&self, chat: &Chat) -> Result<()> {
        let mut chats = self.chats.load().await;
        match chats.iter_mut().find(|c| c.id == chat.id) {
            Some(existing) => *existing = chat.clone(),
            None => chats.insert(0, chat.clone()),
        }
        sort_by_recency(&mut chats);
        if chats.len() > self.max_chats {
            let evicted = chats.split_off(self.max_chats);
            log::debug!("Evicted {} chat(s) beyond the {} cap", evicted.len(), self.max_chats);
        }
        self.chats.store(&chats).await
    }

    /// Returns false (and logs) when no chat had this id.
    pub async fn delete_chat(&self, id: &str) -> Result<bool> {
        let mut chats = self.chats.load().await;
        let before = chats.len();
        chats.retain(|c| c.id != id);
        if chats.len() == before {
            log::warn!("delete_chat: chat '{}' not found", id);
            return Ok(false);
        }
        self.chats.store(&chats).await?;
        Ok(true)
    }

    pub async fn clear_all(&self) -> Result<()> {
        self.chats.clear().await
    }

    /// Create and persist an empty chat.
    pub async fn create_chat(&self) -> Result<Chat> {
        let chat = Chat::new(Self::new_chat_id());
        self.save_chat(&chat).await?;
        log::info!("Created chat {}", chat.id);
        Ok(chat)
    }

    pub async fn append_message(&self, chat_id: &str, message: Message) -> Result<Option<Chat>> {
        self.append_messages(chat_id, vec![message]).await
    }

    /// Read-modify-write against the store, preserving the given order.
    /// `Ok(None)` when the chat no longer exists.
    pub async fn append_messages(&self, chat_id: &str, messages: Vec<Message>) -> Result<Option<Chat>> {
        let Some(mut chat) = self.get_chat(chat_id).await else {
            log::warn!("append: chat '{}' not found, {} message(s) dropped", chat_id, messages.len());
            return Ok(None);
        };
        for message in messages {
            chat.push_message(message);
        }
        self.save_chat(&chat).await?;
        Ok(Some(chat))
    }

    pub async fn rename_chat(&self, chat_id: &str, title: &str) -> Result<Option<Chat>> {
        let Some(mut chat) = self.get_chat(chat_id).await else {
            log::warn!("rename: chat '{}' not found", chat_id);
            return Ok(None);
        };
        chat.title = Self::derive_title(title);
        chat.touch();
        self.save_chat(&chat).await?;
        Ok(Some(chat))
    }

    /// Listing entries, most recent first.
    pub async fn summaries(&self) -> Vec<ChatSummary> {
        let mut chats = self.chats.load().await;
        sort_by_recency(&mut chats);
        chats.iter().map(Chat::summary).collect()
    }

    /// Case-insensitive match on title or any message content, over the
    /// full listing, most recent first.
    pub async fn search(&self, query: &str) -> Vec<Chat> {
        filter_chats(self.chats.load().await, query)
    }
}

/// Most recently updated first. Stable, so ties keep stored order.
pub fn sort_by_recency(chats: &mut [Chat]) {
    chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}

pub fn filter_chats(chats: Vec<Chat>, query: &str) -> Vec<Chat> {
    let mut matched: Vec<Chat> = chats.into_iter().filter(|c| c.matches(query)).collect();
    sort_by_recency(&mut matched);
    matched
}
