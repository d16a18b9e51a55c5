//! Provider connection manager.
//!
//! Local config is the authority for what the user intends to connect;
//! the remote authority is the authority for live status. Status lives only
//! in memory and is re-derived from the remote side on `reconcile`.
//!
//! Lifecycle changes are published on the `LifecycleEvent` bus.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use omni_types::{
    OmniError, Result,
    event::LifecycleEvent,
    provider::{ProviderConfig, ProviderState, ProviderStatus, TransportConfig},
    tool::ToolDescriptor,
};

use crate::collection::JsonCollection;
use crate::event_bus::EventBus;
use crate::ports::{ProviderAuthorityPort, StoragePort};

pub const PROVIDERS_KEY: &str = "omni:providers";

#[derive(Debug, Clone)]
struct RuntimeStatus {
    status: ProviderStatus,
    last_error: Option<String>,
}

pub struct ProviderManager {
    configs: JsonCollection<ProviderConfig>,
    authority: Rc<dyn ProviderAuthorityPort>,
    events: EventBus<LifecycleEvent>,
    runtime: RefCell<HashMap<String, RuntimeStatus>>,
}

impl ProviderManager {
    pub fn new(
        storage: Rc<dyn StoragePort>,
        authority: Rc<dyn ProviderAuthorityPort>,
        events: EventBus<LifecycleEvent>,
    ) -> Self {
        Self {
            configs: JsonCollection::new(storage, PROVIDERS_KEY),
            authority,
            events,
            runtime: RefCell::new(HashMap::new()),
        }
    }

    pub fn events(&self) -> &EventBus<LifecycleEvent> {
        &self.events
    }

    pub async fn configs(&self) -> Vec<ProviderConfig> {
        self.configs.load().await
    }

    pub async fn config(&self, id: &str) -> Option<ProviderConfig> {
        self.configs.load().await.into_iter().find(|c| c.id == id)
    }

    /// Every remembered provider with its runtime status.
    pub async fn states(&self) -> Vec<ProviderState> {
        self.configs
            .load()
            .await
            .into_iter()
            .map(|config| {
                let runtime = self.runtime_status(&config.id);
                ProviderState {
                    config,
                    status: runtime.status,
                    last_error: runtime.last_error,
                }
            })
            .collect()
    }

    pub fn status(&self, id: &str) -> ProviderStatus {
        self.runtime_status(id).status
    }

    pub fn last_error(&self, id: &str) -> Option<String> {
        self.runtime_status(id).last_error
    }

    /// Bring local intent and remote state together:
    /// local configs the remote does not know are registered there, and the
    /// remote's status is recorded for every provider it reports. A remote
    /// transport never replaces a local one; remote-only providers are
    /// adopted locally when their config is readable.
    pub async fn reconcile(&self) -> Result<()> {
        let local = self.configs.load().await;
        let remote = self.authority.list_providers().await.map_err(|e| {
            log::warn!("Provider reconciliation skipped, remote list failed: {}", e);
            e
        })?;
        let remote_ids: HashSet<&str> = remote.iter().map(|p| p.id.as_str()).collect();

        for config in local.iter().filter(|c| !remote_ids.contains(c.id.as_str())) {
            if let Err(e) = self.register(config).await {
                log::warn!("Could not register provider '{}' remotely: {}", config.id, e);
            }
        }

        let local_ids: HashSet<&str> = local.iter().map(|c| c.id.as_str()).collect();
        let mut adopted = Vec::new();
        for provider in &remote {
            if !local_ids.contains(provider.id.as_str()) {
                match TransportConfig::from_server_config(&provider.config) {
                    Some(transport) => adopted.push(ProviderConfig::new(&provider.id, transport)),
                    None => {
                        log::debug!("Ignoring remote provider '{}' with unreadable config", provider.id);
                        continue;
                    }
                }
            }
            self.set_status(&provider.id, provider.status, provider.error.clone());
        }

        if !adopted.is_empty() {
            let mut configs = self.configs.load().await;
            for config in adopted {
                if !configs.iter().any(|c| c.id == config.id) {
                    log::info!("Adopted remote provider '{}'", config.id);
                    configs.push(config);
                }
            }
            self.configs.store(&configs).await?;
        }
        Ok(())
    }

    /// Push the local config to the remote authority.
    pub async fn connect(&self, id: &str) -> Result<ProviderStatus> {
        let Some(config) = self.config(id).await else {
            log::warn!("connect: provider '{}' not found", id);
            return Ok(ProviderStatus::Disconnected);
        };
        self.register(&config).await
    }

    /// The provider ends up disconnected locally even if the remote
    /// teardown fails; the failure is still returned for display.
    pub async fn disconnect(&self, id: &str) -> Result<()> {
        let result = self.authority.disconnect(id).await;
        let error = result.as_ref().err().map(|e| e.to_string());
        if let Some(ref e) = error {
            log::warn!("Remote disconnect of '{}' failed: {}", id, e);
        }
        self.set_status(id, ProviderStatus::Disconnected, error);
        self.events.emit(LifecycleEvent::ProviderDisconnected { id: id.to_string() });
        result
    }

    /// Best-effort remote removal, then unconditional local deletion.
    pub async fn remove(&self, id: &str) -> Result<()> {
        if let Err(e) = self.authority.remove(id).await {
            log::warn!("Remote removal of '{}' failed (ignored): {}", id, e);
        }
        let mut configs = self.configs.load().await;
        let before = configs.len();
        configs.retain(|c| c.id != id);
        if configs.len() == before {
            log::debug!("remove: provider '{}' was not stored locally", id);
        } else {
            self.configs.store(&configs).await?;
        }
        self.runtime.borrow_mut().remove(id);
        self.events.emit(LifecycleEvent::ProviderDisconnected { id: id.to_string() });
        Ok(())
    }

    /// Validate, remember, then connect. Nothing is stored or sent when
    /// validation fails.
    pub async fn add_and_connect(&self, id: &str, transport: TransportConfig) -> Result<ProviderStatus> {
        let id = id.trim();
        if id.is_empty() {
            return Err(OmniError::Validation("provider id is required".to_string()));
        }
        transport.validate()?;

        let mut configs = self.configs.load().await;
        match configs.iter_mut().find(|c| c.id == id) {
            Some(existing) => existing.transport = transport,
            None => configs.push(ProviderConfig::new(id, transport)),
        }
        self.configs.store(&configs).await?;
        self.connect(id).await
    }

    pub async fn provider_tools(&self, id: &str) -> Result<Vec<ToolDescriptor>> {
        self.authority.provider_tools(id).await
    }

    async fn register(&self, config: &ProviderConfig) -> Result<ProviderStatus> {
        let id = config.id.as_str();
        self.set_status(id, ProviderStatus::Connecting, None);
        log::info!("Connecting provider '{}' ({})", id, config.transport.kind());

        let outcome = match self.authority.connect(id, &config.transport).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.set_status(id, ProviderStatus::Disconnected, Some(e.to_string()));
                return Err(e);
            }
        };
        if !outcome.success {
            let message = outcome.error.unwrap_or(outcome.status);
            self.set_status(id, ProviderStatus::Disconnected, Some(message.clone()));
            return Err(OmniError::Other(message));
        }

        self.set_status(id, ProviderStatus::Connected, None);
        log::info!("Provider '{}' {}", id, outcome.status);
        self.events.emit(LifecycleEvent::ProviderConnected { id: id.to_string() });

        // The remote side is connected whatever happens to the timestamp.
        if let Err(e) = self.touch_connected(id).await {
            log::warn!("Could not record connection time of '{}': {}", id, e);
        }
        Ok(ProviderStatus::Connected)
    }

    async fn touch_connected(&self, id: &str) -> Result<()> {
        let mut configs = self.configs.load().await;
        match configs.iter_mut().find(|c| c.id == id) {
            Some(stored) => {
                stored.last_connected_at = Some(omni_types::now_millis());
                self.configs.store(&configs).await
            }
            None => Ok(()),
        }
    }

    fn runtime_status(&self, id: &str) -> RuntimeStatus {
        self.runtime
            .borrow()
            .get(id)
            .cloned()
            .unwrap_or(RuntimeStatus {
                status: ProviderStatus::Disconnected,
                last_error: None,
            })
    }

    fn set_status(&self, id: &str, status: ProviderStatus, last_error: Option<String>) {
        self.runtime
            .borrow_mut()
            .insert(id.to_string(), RuntimeStatus { status, last_error });
    }
}
