//! Tracks which assistant audio has already been played so a reply is
//! auto-played once, and reloading a chat does not replay old answers.
//! Messages are keyed by role and timestamp.

use std::collections::HashSet;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use omni_types::{
    OmniError, Result,
    chat::Chat,
    message::{Message, Role},
};

#[derive(Debug, Default)]
pub struct AudioPlaybackTracker {
    played: HashSet<(Role, i64)>,
}

impl AudioPlaybackTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_played(&self, message: &Message) -> bool {
        self.played.contains(&(message.role, message.timestamp))
    }

    /// Use when opening a stored chat.
    pub fn mark_all_played(&mut self, chat: &Chat) {
        for message in chat.messages.iter().filter(|m| m.audio_data.is_some()) {
            self.played.insert((message.role, message.timestamp));
        }
    }

    /// The newest assistant message with audio not yet played, marked as played.
    pub fn next_unplayed<'a>(&mut self, chat: &'a Chat) -> Option<&'a Message> {
        let message = chat
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && m.audio_data.is_some())?;
        if self.played.insert((message.role, message.timestamp)) {
            Some(message)
        } else {
            None
        }
    }
}

/// Raw bytes of a base64 audio payload.
pub fn decode_audio(data: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(data.trim())
        .map_err(|e| OmniError::Serialization(format!("invalid audio payload: {}", e)))
}
