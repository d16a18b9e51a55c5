//! Port traits: the hexagonal architecture boundary.
//!
//! These traits are defined here in `omni-core` (pure Rust).
//! Implementations live in `omni-platform` (storage and HTTP adapters).
//! The core never imports platform code; it only depends on these traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use omni_types::{
    Result,
    config::GenerationOptions,
    event::StorageChange,
    message::{Role, ToolCallRequest},
    provider::{ConnectOutcome, RemoteProvider, TransportConfig},
    tool::ToolDescriptor,
};

use crate::event_bus::Subscription;

// ─── Storage Port ────────────────────────────────────────────

#[async_trait(?Send)]
pub trait StoragePort {
    /// Get a value by key
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Set a value
    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Delete a value
    async fn delete(&self, key: &str) -> Result<()>;

    /// List keys with a given prefix
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Check if a key exists
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Writes to this store, including ones made by other contexts
    /// sharing the same medium.
    fn subscribe_changes(&self) -> Subscription<StorageChange>;

    /// Name of this backend (for logging/debug)
    fn backend_name(&self) -> &str;
}

// ─── Inference Port ──────────────────────────────────────────

/// One message in the backend's wire schema. Media is inlined as data URLs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub video: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub audio: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tool_call_id: Option<String>,
}

impl WireMessage {
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            image: None,
            video: None,
            audio: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

/// Request to send to the inference backend
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<WireMessage>,
    pub tools: Vec<ToolDescriptor>,
    /// `return_audio` selects the audio response format
    pub generation: GenerationOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioOutput {
    /// Base64 encoded
    pub data: String,
    pub format: String,
}

/// Complete response from the inference backend
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub id: String,
    pub model: String,
    /// The first choice's assistant message
    pub message: WireMessage,
    pub audio: Option<AudioOutput>,
    /// Intermediate tool-call/tool-result turns plus the final answer
    pub conversation_messages: Option<Vec<WireMessage>>,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendHealth {
    pub status: String,
    pub model_loaded: bool,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub context_length: Option<u32>,
}

impl BackendHealth {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy" && self.model_loaded
    }
}

#[async_trait(?Send)]
pub trait InferencePort {
    /// Non-streaming chat completion
    async fn chat_completion(&self, req: CompletionRequest) -> Result<CompletionResponse>;

    /// Built-in tools plus those of every connected provider
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>>;

    async fn health(&self) -> Result<BackendHealth>;
}

// ─── Provider Authority Port ─────────────────────────────────

/// The remote side that actually owns provider processes and connections.
#[async_trait(?Send)]
pub trait ProviderAuthorityPort {
    async fn list_providers(&self) -> Result<Vec<RemoteProvider>>;

    async fn connect(&self, id: &str, transport: &TransportConfig) -> Result<ConnectOutcome>;

    async fn disconnect(&self, id: &str) -> Result<()>;

    async fn remove(&self, id: &str) -> Result<()>;

    async fn provider_tools(&self, id: &str) -> Result<Vec<ToolDescriptor>>;

    async fn all_tools(&self) -> Result<Vec<ToolDescriptor>>;
}
