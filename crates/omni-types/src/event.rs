use serde::{Deserialize, Serialize};

use crate::message::Role;

/// Provider lifecycle signals. The tool catalog subscribes to these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleEvent {
    ProviderConnected { id: String },
    ProviderDisconnected { id: String },
    /// Manual "refresh tools" request from the user
    ToolsRefreshRequested,
}

/// Events emitted by the turn orchestrator.
/// UI subscribes to these for reactive updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnEvent {
    /// A user turn was accepted for this chat
    TurnStart { chat_id: String },

    /// A message was persisted to the chat
    MessageAppended { chat_id: String, role: Role },

    /// Nothing more will be appended for this turn
    TurnEnd { chat_id: String },

    /// The backend went offline or came back
    ConnectivityChanged { online: bool },
}

/// A write to the durable store, possibly made by another context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageChange {
    /// Empty when the whole store was cleared
    pub key: String,
}

impl StorageChange {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn cleared() -> Self {
        Self { key: String::new() }
    }

    pub fn affects(&self, key: &str) -> bool {
        self.key.is_empty() || self.key == key
    }
}
