use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{OmniError, Result};

/// How the backend reaches a tool provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    /// A child process speaking over stdio
    Process {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    Http {
        url: String,
        #[serde(default)]
        prefer_streaming: bool,
    },
}

impl TransportConfig {
    pub fn process(command: impl Into<String>, args: Vec<String>) -> Self {
        TransportConfig::Process {
            command: command.into(),
            args,
            env: BTreeMap::new(),
        }
    }

    pub fn http(url: impl Into<String>) -> Self {
        TransportConfig::Http {
            url: url.into(),
            prefer_streaming: false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TransportConfig::Process { .. } => "process",
            TransportConfig::Http { .. } => "http",
        }
    }

    /// Required fields per kind. Runs before any network or process call.
    pub fn validate(&self) -> Result<()> {
        match self {
            TransportConfig::Process { command, .. } if command.trim().is_empty() => Err(
                OmniError::Validation("process transport requires a command".to_string()),
            ),
            TransportConfig::Http { url, .. } if url.trim().is_empty() => Err(
                OmniError::Validation("http transport requires a url".to_string()),
            ),
            _ => Ok(()),
        }
    }

    /// Shape the server expects in `server_config`.
    pub fn to_server_config(&self) -> Value {
        match self {
            TransportConfig::Process { command, args, env } => json!({
                "command": command,
                "args": args,
                "env": env,
            }),
            TransportConfig::Http { url, prefer_streaming } => json!({
                "url": url,
                "prefer_sse": prefer_streaming,
            }),
        }
    }

    /// Inverse of `to_server_config`. A config with a `command` is a process.
    pub fn from_server_config(value: &Value) -> Option<Self> {
        if let Some(command) = value.get("command").and_then(|c| c.as_str()) {
            let args = value
                .get("args")
                .and_then(|a| serde_json::from_value(a.clone()).ok())
                .unwrap_or_default();
            let env = value
                .get("env")
                .and_then(|e| serde_json::from_value(e.clone()).ok())
                .unwrap_or_default();
            return Some(TransportConfig::Process {
                command: command.to_string(),
                args,
                env,
            });
        }
        let url = value.get("url")?.as_str()?;
        Some(TransportConfig::Http {
            url: url.to_string(),
            prefer_streaming: value
                .get("prefer_sse")
                .and_then(|p| p.as_bool())
                .unwrap_or(false),
        })
    }
}

/// A remembered provider definition. Only intent is persisted, never status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub transport: TransportConfig,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_connected_at: Option<i64>,
}

impl ProviderConfig {
    pub fn new(id: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            id: id.into(),
            transport,
            last_connected_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl ProviderStatus {
    /// The server decorates its status ("connected (3 tools)").
    pub fn parse(raw: &str) -> ProviderStatus {
        let raw = raw.trim().to_lowercase();
        if raw.starts_with("connected") {
            ProviderStatus::Connected
        } else if raw.starts_with("connecting") {
            ProviderStatus::Connecting
        } else {
            ProviderStatus::Disconnected
        }
    }
}

/// A local config joined with its runtime status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderState {
    pub config: ProviderConfig,
    pub status: ProviderStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_error: Option<String>,
}

/// What the remote authority reports for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteProvider {
    pub id: String,
    pub status: ProviderStatus,
    #[serde(default)]
    pub config: Value,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

/// Result of asking the remote authority to connect a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectOutcome {
    pub success: bool,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}
