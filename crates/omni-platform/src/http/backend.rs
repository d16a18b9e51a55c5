//! HTTP client for the inference server.
//!
//! One adapter serves both ports: chat completions and the tool list
//! (`InferencePort`) plus MCP provider management (`ProviderAuthorityPort`).
//! Uses browser `fetch()` via gloo-net for WASM compatibility; every call
//! races a gloo-timers timeout.

use std::future::Future;

use async_trait::async_trait;
use futures::future::{self, Either};
use gloo_net::http::{Request, RequestBuilder, Response};
use gloo_timers::future::TimeoutFuture;
use serde_json::Value;

use omni_core::ports::*;
use omni_types::{
    OmniError, Result,
    config::BackendConfig,
    provider::{ConnectOutcome, RemoteProvider, TransportConfig},
    tool::ToolDescriptor,
};

use crate::wire;

/// Short calls (listings, health) get this long regardless of config.
const QUICK_TIMEOUT_MS: u64 = 10_000;

pub struct OmniHttpBackend {
    config: BackendConfig,
}

impl OmniHttpBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    async fn get(&self, path: &str, timeout_ms: u64) -> Result<String> {
        let url = self.config.endpoint(path);
        send(&url, timeout_ms, Request::get(&url).send()).await
    }

    async fn post(&self, path: &str, body: &Value, timeout_ms: u64) -> Result<String> {
        let url = self.config.endpoint(path);
        let request = json_request(Request::post(&url), body)?;
        send(&url, timeout_ms, request.send()).await
    }

    async fn delete(&self, path: &str) -> Result<String> {
        let url = self.config.endpoint(path);
        send(&url, QUICK_TIMEOUT_MS, Request::delete(&url).send()).await
    }
}

#[async_trait(?Send)]
impl InferencePort for OmniHttpBackend {
    async fn chat_completion(&self, req: CompletionRequest) -> Result<CompletionResponse> {
        let body = wire::completion_body(&req);
        let text = self
            .post(wire::CHAT_COMPLETIONS_PATH, &body, self.config.inference_timeout_ms)
            .await?;
        wire::parse_completion(&text)
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        match self.get(wire::TOOLS_PATH, QUICK_TIMEOUT_MS).await {
            Ok(text) => wire::parse_tools(&text),
            // Servers without a built-in tool registry only expose the MCP aggregate.
            Err(OmniError::Rejected { status: 404, .. }) => {
                log::debug!("{} not served, using {}", wire::TOOLS_PATH, wire::PROVIDER_TOOLS_PATH);
                self.all_tools().await
            }
            Err(e) => Err(e),
        }
    }

    async fn health(&self) -> Result<BackendHealth> {
        let text = self.get(wire::HEALTH_PATH, QUICK_TIMEOUT_MS).await?;
        wire::parse_health(&text)
    }
}

#[async_trait(?Send)]
impl ProviderAuthorityPort for OmniHttpBackend {
    async fn list_providers(&self) -> Result<Vec<RemoteProvider>> {
        let text = self.get(wire::PROVIDERS_PATH, QUICK_TIMEOUT_MS).await?;
        wire::parse_providers(&text)
    }

    async fn connect(&self, id: &str, transport: &TransportConfig) -> Result<ConnectOutcome> {
        let body = wire::connect_body(id, transport);
        let text = self
            .post(wire::CONNECT_PATH, &body, self.config.connect_timeout_ms)
            .await?;
        wire::parse_connect_outcome(&text)
    }

    async fn disconnect(&self, id: &str) -> Result<()> {
        let path = format!("{}/disconnect", wire::provider_path(id));
        self.post(&path, &Value::Null, QUICK_TIMEOUT_MS).await?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.delete(&wire::provider_path(id)).await?;
        Ok(())
    }

    async fn provider_tools(&self, id: &str) -> Result<Vec<ToolDescriptor>> {
        let path = format!("{}/tools", wire::provider_path(id));
        let text = self.get(&path, QUICK_TIMEOUT_MS).await?;
        wire::parse_tools(&text)
    }

    async fn all_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let text = self.get(wire::PROVIDER_TOOLS_PATH, QUICK_TIMEOUT_MS).await?;
        wire::parse_tools(&text)
    }
}

// ─── Helpers ─────────────────────────────────────────────────

fn json_request(builder: RequestBuilder, body: &Value) -> Result<Request> {
    builder
        .header("Content-Type", "application/json")
        .json(body)
        .map_err(|e| OmniError::Serialization(e.to_string()))
}

/// Await the fetch under a timeout, then split "reached but refused"
/// from "never reached".
async fn send<F>(url: &str, timeout_ms: u64, request: F) -> Result<String>
where
    F: Future<Output = std::result::Result<Response, gloo_net::Error>>,
{
    let timeout = TimeoutFuture::new(timeout_ms.min(u32::MAX as u64) as u32);
    futures::pin_mut!(request);

    let response = match future::select(request, timeout).await {
        Either::Left((result, _)) => result.map_err(|e| wire::transport_failure(url, e))?,
        Either::Right(_) => {
            log::warn!("Request to {} timed out after {}ms", url, timeout_ms);
            return Err(OmniError::Timeout(timeout_ms));
        }
    };

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| wire::transport_failure(url, e))?;

    if !response.ok() {
        log::warn!("{} returned HTTP {}", url, status);
        return Err(wire::rejection(status, &text));
    }
    Ok(text)
}
