//! Tool catalog: the descriptors the model may call right now.
//!
//! The backend aggregates built-in tools and every connected provider; the
//! catalog caches that list and refreshes it on provider lifecycle events
//! and on manual refresh requests.

use std::collections::HashSet;

use omni_types::{Result, event::LifecycleEvent, tool::ToolDescriptor};

use crate::event_bus::{EventBus, Subscription};
use crate::ports::InferencePort;

/// Lets a caller tell "still loading", "empty" and "failed" apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogStatus {
    /// Never refreshed
    Idle,
    Loading,
    Ready,
    Failed(String),
}

pub struct ToolCatalog {
    tools: Vec<ToolDescriptor>,
    status: CatalogStatus,
    events: Subscription<LifecycleEvent>,
    refresh_count: u64,
}

impl ToolCatalog {
    pub fn new(events: &EventBus<LifecycleEvent>) -> Self {
        Self {
            tools: Vec::new(),
            status: CatalogStatus::Idle,
            events: events.subscribe(),
            refresh_count: 0,
        }
    }

    pub fn status(&self) -> &CatalogStatus {
        &self.status
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Number of refreshes attempted so far.
    pub fn refresh_count(&self) -> u64 {
        self.refresh_count
    }

    /// Replace the cached list in one step. On failure the previous list is
    /// kept and the status records the error.
    pub async fn refresh(&mut self, backend: &dyn InferencePort) -> Result<usize> {
        self.refresh_count += 1;
        self.status = CatalogStatus::Loading;

        match backend.list_tools().await {
            Ok(tools) => {
                let mut seen = HashSet::new();
                let mut unique = Vec::with_capacity(tools.len());
                for tool in tools {
                    if seen.insert(tool.name().to_string()) {
                        unique.push(tool);
                    } else {
                        log::warn!("Duplicate tool '{}' ignored", tool.name());
                    }
                }
                log::info!("Tool catalog refreshed: {} tool(s)", unique.len());
                self.tools = unique;
                self.status = CatalogStatus::Ready;
                Ok(self.tools.len())
            }
            Err(e) => {
                log::warn!("Tool catalog refresh failed: {}", e);
                self.status = CatalogStatus::Failed(e.to_string());
                Err(e)
            }
        }
    }

    /// Drain lifecycle events, refreshing once per event.
    /// Returns the number of refreshes run.
    pub async fn process_events(&mut self, backend: &dyn InferencePort) -> usize {
        let events = self.events.drain();
        let mut refreshes = 0;
        for event in events {
            match event {
                LifecycleEvent::ProviderConnected { ref id }
                | LifecycleEvent::ProviderDisconnected { ref id } => {
                    log::debug!("Provider '{}' changed, refreshing tools", id);
                }
                LifecycleEvent::ToolsRefreshRequested => {
                    log::debug!("Manual tool refresh requested");
                }
            }
            // Failures are recorded in the status.
            let _ = self.refresh(backend).await;
            refreshes += 1;
        }
        refreshes
    }
}
