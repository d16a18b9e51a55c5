use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::{OmniError, Result};

/// Role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    pub fn parse(raw: &str) -> Option<Role> {
        match raw {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }
}

/// Media stored inline as base64 so it survives a reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaPayload {
    pub mime_type: String,
    /// Base64 without the `data:` prefix
    pub data: String,
}

impl MediaPayload {
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: STANDARD.encode(bytes),
        }
    }

    /// Parse a `data:<mime>;base64,<payload>` URL.
    pub fn from_data_url(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("data:")
            .ok_or_else(|| OmniError::Validation("media must be a data URL".to_string()))?;
        let (header, data) = rest
            .split_once(',')
            .ok_or_else(|| OmniError::Validation("data URL has no payload".to_string()))?;
        let mime_type = header
            .strip_suffix(";base64")
            .ok_or_else(|| OmniError::Validation("data URL must be base64 encoded".to_string()))?;
        if mime_type.is_empty() {
            return Err(OmniError::Validation("data URL has no mime type".to_string()));
        }
        STANDARD
            .decode(data)
            .map_err(|e| OmniError::Validation(format!("invalid base64 payload: {}", e)))?;
        Ok(Self {
            mime_type: mime_type.to_string(),
            data: data.to_string(),
        })
    }

    /// Self-describing encoding used on the wire.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    pub fn decode(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(&self.data)
            .map_err(|e| OmniError::Serialization(e.to_string()))
    }
}

/// A tool call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String, // JSON string
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// One turn or sub-turn within a chat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    pub timestamp: i64,
    /// Base64 audio synthesised by the assistant for this message
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub audio_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub image: Option<MediaPayload>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub video: Option<MediaPayload>,
    /// Audio recorded by the user as part of their turn
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub input_audio: Option<MediaPayload>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tool_calls: Vec<ToolCallRequest>,
    /// Present when role == Tool
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: crate::now_millis(),
            audio_data: None,
            image: None,
            video: None,
            input_audio: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCallRequest>) -> Self {
        self.tool_calls = calls;
        self
    }

    pub fn with_image(mut self, image: MediaPayload) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_video(mut self, video: MediaPayload) -> Self {
        self.video = Some(video);
        self
    }

    pub fn with_input_audio(mut self, audio: MediaPayload) -> Self {
        self.input_audio = Some(audio);
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn has_media(&self) -> bool {
        self.image.is_some() || self.video.is_some() || self.input_audio.is_some()
    }

    pub fn is_tool_related(&self) -> bool {
        self.role == Role::Tool || !self.tool_calls.is_empty()
    }

    /// System messages are model context only.
    pub fn is_visible(&self) -> bool {
        self.role != Role::System
    }
}
