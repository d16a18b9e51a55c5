use serde::{Deserialize, Serialize};

use crate::{OmniError, Result};

/// Top-level client configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub generation: GenerationOptions,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub system_prompt: Option<String>,
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.backend.base_url.trim().is_empty() {
            return Err(OmniError::Config("backend base_url is empty".to_string()));
        }
        if self.history.max_chats == 0 {
            return Err(OmniError::Config("max_chats must be at least 1".to_string()));
        }
        self.generation.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    /// Generation is slow; minutes, not seconds.
    pub inference_timeout_ms: u64,
    /// Process startup or HTTP handshake of a tool provider.
    pub connect_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8665".to_string(),
            inference_timeout_ms: 300_000,
            connect_timeout_ms: 30_000,
        }
    }
}

impl BackendConfig {
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    /// Ask the backend to synthesise speech for the reply
    pub return_audio: bool,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.7,
            top_p: 0.9,
            return_audio: false,
        }
    }
}

impl GenerationOptions {
    pub fn validate(&self) -> Result<()> {
        if !(1..=4096).contains(&self.max_tokens) {
            return Err(OmniError::Config(format!(
                "max_tokens must be within 1..=4096, got {}",
                self.max_tokens
            )));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(OmniError::Config(format!(
                "temperature must be within 0.0..=2.0, got {}",
                self.temperature
            )));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(OmniError::Config(format!(
                "top_p must be within 0.0..=1.0, got {}",
                self.top_p
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Oldest chats by recency beyond this are evicted on save
    pub max_chats: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_chats: 50 }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackendType,
    /// Directory for the file backend
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StorageBackendType {
    /// Auto-detect best available backend
    #[default]
    Auto,
    Memory,
    LocalStorage,
    File,
}
