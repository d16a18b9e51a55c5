//! JSON shapes of the inference server.
//!
//! Kept apart from the fetch code so request building, response parsing and
//! error normalisation work (and are tested) on every target.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Deserialize;
use serde_json::{json, Value};

use omni_core::ports::{
    AudioOutput, BackendHealth, CompletionRequest, CompletionResponse, TokenUsage, WireMessage,
};
use omni_types::{
    OmniError, Result,
    message::{FunctionCall, Role, ToolCallRequest},
    provider::{ConnectOutcome, ProviderStatus, RemoteProvider, TransportConfig},
    tool::ToolDescriptor,
};

pub const CHAT_COMPLETIONS_PATH: &str = "/v1/omni/chat/completions";
pub const TOOLS_PATH: &str = "/v1/tools";
pub const PROVIDER_TOOLS_PATH: &str = "/v1/mcp/tools";
pub const HEALTH_PATH: &str = "/health";
pub const PROVIDERS_PATH: &str = "/v1/mcp/servers";
pub const CONNECT_PATH: &str = "/v1/mcp/servers/connect";

/// Provider ids are user-chosen, so they are escaped as one path segment.
const SEGMENT_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

pub fn provider_path(id: &str) -> String {
    format!("{}/{}", PROVIDERS_PATH, utf8_percent_encode(id, SEGMENT_ENCODE_SET))
}

/// Audio format assumed when the server does not say.
const DEFAULT_AUDIO_FORMAT: &str = "wav";

// ─── Requests ────────────────────────────────────────────────

pub fn completion_body(req: &CompletionRequest) -> Value {
    let messages: Vec<Value> = req.messages.iter().map(message_to_json).collect();
    let generation = &req.generation;

    let mut body = json!({
        "messages": messages,
        "max_tokens": generation.max_tokens,
        "temperature": generation.temperature,
        "top_p": generation.top_p,
        "return_audio": generation.return_audio,
    });

    if generation.return_audio {
        body["response_format"] = json!({ "type": "audio" });
    }

    if !req.tools.is_empty() {
        body["tools"] = json!(req.tools);
    }

    body
}

pub fn connect_body(id: &str, transport: &TransportConfig) -> Value {
    json!({
        "server_id": id,
        "server_config": transport.to_server_config(),
    })
}

fn message_to_json(msg: &WireMessage) -> Value {
    let mut obj = json!({
        "role": msg.role.as_str(),
        "content": msg.content,
    });

    // The server reads media from the `*_path` fields; data URLs travel there too.
    for (field, payload) in [
        ("image_path", &msg.image),
        ("video_path", &msg.video),
        ("audio_path", &msg.audio),
    ] {
        if let Some(url) = payload {
            obj[field] = json!(url);
        }
    }

    if let Some(ref id) = msg.tool_call_id {
        obj["tool_call_id"] = json!(id);
    }

    if !msg.tool_calls.is_empty() {
        let calls: Vec<Value> = msg
            .tool_calls
            .iter()
            .map(|tc| {
                json!({
                    "id": tc.id,
                    "type": "function",
                    "function": {
                        "name": tc.function.name,
                        "arguments": tc.function.arguments,
                    }
                })
            })
            .collect();
        obj["tool_calls"] = json!(calls);
    }

    obj
}

// ─── API response types ──────────────────────────────────────

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
    /// Legacy location of the response audio
    #[serde(default)]
    audio_base64: Option<String>,
    #[serde(default)]
    conversation_messages: Option<Vec<ApiMessage>>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    audio: Option<ApiAudio>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default)]
    tool_call_id: Option<String>,
}

#[derive(Deserialize)]
struct ApiAudio {
    data: String,
    #[serde(default)]
    format: Option<String>,
}

#[derive(Deserialize)]
struct ApiToolCall {
    id: String,
    function: ApiFunction,
}

#[derive(Deserialize)]
struct ApiFunction {
    name: String,
    /// Usually a JSON string; some servers send the object itself
    #[serde(default)]
    arguments: Value,
}

#[derive(Deserialize)]
struct ApiProviderList {
    #[serde(default)]
    servers: Vec<ApiProvider>,
}

#[derive(Deserialize)]
struct ApiProvider {
    id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    config: Value,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ApiConnectResponse {
    success: bool,
    #[serde(default)]
    status: String,
    #[serde(default)]
    error: Option<String>,
}

// ─── Responses ───────────────────────────────────────────────

pub fn parse_completion(text: &str) -> Result<CompletionResponse> {
    let data: ApiResponse = serde_json::from_str(text)?;

    let choice = data
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| OmniError::Serialization("No choices in response".to_string()))?;

    let message_audio = choice.message.audio.as_ref().map(|a| AudioOutput {
        data: a.data.clone(),
        format: a
            .format
            .clone()
            .unwrap_or_else(|| DEFAULT_AUDIO_FORMAT.to_string()),
    });
    let audio = message_audio.or_else(|| {
        data.audio_base64
            .filter(|a| !a.is_empty())
            .map(|data| AudioOutput {
                data,
                format: DEFAULT_AUDIO_FORMAT.to_string(),
            })
    });

    let message = parse_api_message(choice.message).unwrap_or_else(|| WireMessage::text(Role::Assistant, ""));
    let conversation_messages = data
        .conversation_messages
        .map(|msgs| msgs.into_iter().filter_map(parse_api_message).collect());

    Ok(CompletionResponse {
        id: data.id,
        model: data.model,
        message,
        audio,
        conversation_messages,
        usage: data.usage,
    })
}

fn parse_api_message(api: ApiMessage) -> Option<WireMessage> {
    let Some(role) = Role::parse(&api.role) else {
        log::warn!("Skipping message with unknown role '{}'", api.role);
        return None;
    };

    let tool_calls = api
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| ToolCallRequest {
            id: tc.id,
            function: FunctionCall {
                name: tc.function.name,
                arguments: match tc.function.arguments {
                    Value::String(s) => s,
                    Value::Null => "{}".to_string(),
                    other => other.to_string(),
                },
            },
        })
        .collect();

    Some(WireMessage {
        tool_calls,
        tool_call_id: api.tool_call_id,
        ..WireMessage::text(role, api.content.unwrap_or_default())
    })
}

/// Tool descriptors from either `{"tools": [...]}` or a bare array.
/// Entries in neither the OpenAI nor the MCP shape are skipped.
pub fn parse_tools(text: &str) -> Result<Vec<ToolDescriptor>> {
    let value: Value = serde_json::from_str(text)?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("tools") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => return Err(OmniError::Serialization("tool list is not an array".to_string())),
    };

    Ok(items
        .iter()
        .filter_map(|item| {
            let tool = ToolDescriptor::from_value(item);
            if tool.is_none() {
                log::warn!("Skipping malformed tool descriptor: {}", item);
            }
            tool
        })
        .collect())
}

pub fn parse_providers(text: &str) -> Result<Vec<RemoteProvider>> {
    let list: ApiProviderList = serde_json::from_str(text)?;
    Ok(list
        .servers
        .into_iter()
        .map(|p| RemoteProvider {
            id: p.id,
            status: ProviderStatus::parse(&p.status),
            config: p.config,
            error: p.error,
        })
        .collect())
}

pub fn parse_connect_outcome(text: &str) -> Result<ConnectOutcome> {
    let api: ApiConnectResponse = serde_json::from_str(text)?;
    Ok(ConnectOutcome {
        success: api.success,
        status: api.status,
        error: api.error,
    })
}

pub fn parse_health(text: &str) -> Result<BackendHealth> {
    Ok(serde_json::from_str(text)?)
}

// ─── Errors ──────────────────────────────────────────────────

/// A non-2xx reply: the server was reached and refused.
/// The `detail` field is shown as-is; validation errors carry a list.
pub fn rejection(status: u16, body: &str) -> OmniError {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("detail").and_then(detail_text))
        .unwrap_or_else(|| {
            let body = body.trim();
            if body.is_empty() {
                format!("HTTP {}", status)
            } else {
                body.to_string()
            }
        });
    OmniError::Rejected { status, detail }
}

fn detail_text(detail: &Value) -> Option<String> {
    match detail {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .map(|item| match item.get("msg").and_then(Value::as_str) {
                    Some(msg) => msg.to_string(),
                    None => item.to_string(),
                })
                .collect();
            Some(parts.join("; "))
        }
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// No response at all: DNS, refused connection, CORS, aborted fetch.
pub fn transport_failure(url: &str, err: impl std::fmt::Display) -> OmniError {
    OmniError::Unreachable(format!("{}: {}", url, err))
}
