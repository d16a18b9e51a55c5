//! Composition root: wires a store and a backend into the core services
//! and exposes the operations a chat UI needs.
//!
//! Everything is single-threaded. Services sit behind `RefCell`s and are
//! borrowed with `try_borrow_mut`, so a second call arriving while a turn
//! (or a refresh) is in flight fails with `OmniError::Busy` instead of
//! panicking.

use std::cell::{RefCell, RefMut};
use std::rc::Rc;

use omni_core::audio::AudioPlaybackTracker;
use omni_core::catalog::{CatalogStatus, ToolCatalog};
use omni_core::event_bus::{EventBus, Subscription};
use omni_core::history::ChatHistory;
use omni_core::orchestrator::{TurnInput, TurnOrchestrator, TurnOutcome};
use omni_core::ports::{InferencePort, ProviderAuthorityPort, StoragePort};
use omni_core::providers::ProviderManager;
use omni_core::repository::ConversationRepository;
use omni_types::{
    OmniError, Result,
    chat::{Chat, ChatSummary},
    config::{ClientConfig, GenerationOptions},
    event::{LifecycleEvent, TurnEvent},
    provider::{ProviderState, ProviderStatus, TransportConfig},
    tool::ToolDescriptor,
};

pub const CONFIG_KEY: &str = "omni:config";

pub struct Session {
    config: RefCell<ClientConfig>,
    storage: Rc<dyn StoragePort>,
    backend: Rc<dyn InferencePort>,
    history: RefCell<ChatHistory>,
    providers: ProviderManager,
    catalog: RefCell<ToolCatalog>,
    orchestrator: RefCell<TurnOrchestrator>,
    audio: RefCell<AudioPlaybackTracker>,
    turn_events: Subscription<TurnEvent>,
}

impl Session {
    /// Restore the saved configuration, then assemble.
    pub async fn open(
        storage: Rc<dyn StoragePort>,
        backend: Rc<dyn InferencePort>,
        authority: Rc<dyn ProviderAuthorityPort>,
    ) -> Self {
        let config = restore_config(storage.as_ref()).await;
        Self::assemble(config, storage, backend, authority).await
    }

    pub async fn assemble(
        config: ClientConfig,
        storage: Rc<dyn StoragePort>,
        backend: Rc<dyn InferencePort>,
        authority: Rc<dyn ProviderAuthorityPort>,
    ) -> Self {
        let repository = Rc::new(ConversationRepository::with_capacity(
            storage.clone(),
            config.history.max_chats,
        ));
        let history = ChatHistory::load(repository.clone()).await;

        let lifecycle = EventBus::new();
        let catalog = ToolCatalog::new(&lifecycle);
        let providers = ProviderManager::new(storage.clone(), authority, lifecycle);

        let turn_bus = EventBus::new();
        let turn_events = turn_bus.subscribe();
        let orchestrator = TurnOrchestrator::new(repository, turn_bus)
            .with_generation(config.generation.clone())
            .with_system_prompt(config.system_prompt.clone());

        log::info!(
            "Session ready: storage={}, backend={}",
            storage.backend_name(),
            config.backend.base_url
        );

        Self {
            config: RefCell::new(config),
            storage,
            backend,
            history: RefCell::new(history),
            providers,
            catalog: RefCell::new(catalog),
            orchestrator: RefCell::new(orchestrator),
            audio: RefCell::new(AudioPlaybackTracker::new()),
            turn_events,
        }
    }

    /// Reconcile providers, load the tool catalog and probe the backend.
    /// Failures are logged; the session stays usable offline.
    pub async fn start(&self) {
        if let Err(e) = self.providers.reconcile().await {
            log::warn!("Provider reconciliation failed: {}", e);
        }
        self.process_lifecycle().await;
        if let Ok(mut catalog) = exclusive(&self.catalog) {
            if let Err(e) = catalog.refresh(self.backend.as_ref()).await {
                log::warn!("Initial tool refresh failed: {}", e);
            }
        }
        if let Ok(mut orchestrator) = exclusive(&self.orchestrator) {
            orchestrator.probe(self.backend.as_ref()).await;
        }
    }

    // ─── Configuration ───────────────────────────────────────

    pub fn config(&self) -> ClientConfig {
        self.config.borrow().clone()
    }

    pub async fn set_generation(&self, generation: GenerationOptions) -> Result<()> {
        generation.validate()?;
        *exclusive(&self.orchestrator)?.generation_mut() = generation.clone();
        let config = {
            let mut config = exclusive(&self.config)?;
            config.generation = generation;
            config.clone()
        };
        save_config(self.storage.as_ref(), &config).await
    }

    // ─── Turns ───────────────────────────────────────────────

    /// Run one turn against `chat_id` (a new chat when absent or gone).
    pub async fn send(&self, chat_id: Option<String>, input: TurnInput, tools_enabled: bool) -> Result<TurnOutcome> {
        self.process_lifecycle().await;
        let tools: Vec<ToolDescriptor> = if tools_enabled {
            exclusive(&self.catalog)?.tools().to_vec()
        } else {
            Vec::new()
        };

        let outcome = {
            let mut orchestrator = exclusive(&self.orchestrator)?;
            orchestrator
                .run_turn(chat_id.as_deref(), input, tools_enabled, &tools, self.backend.as_ref())
                .await?
        };

        let mut history = exclusive(&self.history)?;
        history.select(Some(outcome.chat_id.clone()));
        history.reload().await;
        Ok(outcome)
    }

    pub fn is_busy(&self) -> bool {
        self.orchestrator
            .try_borrow()
            .map(|o| o.is_busy())
            .unwrap_or(true)
    }

    pub fn is_online(&self) -> bool {
        self.orchestrator
            .try_borrow()
            .map(|o| o.is_online())
            .unwrap_or(true)
    }

    pub async fn probe(&self) -> Result<bool> {
        let mut orchestrator = exclusive(&self.orchestrator)?;
        Ok(orchestrator.probe(self.backend.as_ref()).await)
    }

    /// Orchestrator events since the last call.
    pub fn drain_turn_events(&self) -> Vec<TurnEvent> {
        self.turn_events.drain()
    }

    // ─── History ─────────────────────────────────────────────

    /// Apply storage notifications (other tabs or processes).
    pub async fn sync(&self) -> Result<bool> {
        Ok(exclusive(&self.history)?.sync().await)
    }

    pub fn chats(&self, query: &str) -> Vec<ChatSummary> {
        self.history
            .borrow()
            .filtered(query)
            .iter()
            .map(Chat::summary)
            .collect()
    }

    pub fn current_chat_id(&self) -> Option<String> {
        self.history.borrow().current_id().map(str::to_string)
    }

    pub async fn current_chat(&self) -> Option<Chat> {
        let history = self.history.try_borrow().ok()?;
        history.current_chat().await
    }

    pub async fn new_chat(&self) -> Result<Chat> {
        exclusive(&self.history)?.new_chat().await
    }

    /// Select a chat for display. Its stored audio counts as already played.
    pub async fn open_chat(&self, id: &str) -> Result<Option<Chat>> {
        let mut history = exclusive(&self.history)?;
        history.select(Some(id.to_string()));
        let chat = history.current_chat().await;
        if let Some(ref chat) = chat {
            exclusive(&self.audio)?.mark_all_played(chat);
        }
        Ok(chat)
    }

    pub async fn delete_chat(&self, id: &str) -> Result<()> {
        exclusive(&self.history)?.delete(id).await
    }

    pub async fn clear_history(&self) -> Result<()> {
        exclusive(&self.history)?.clear().await
    }

    /// Base64 audio of the newest reply in `chat` not yet played.
    pub fn next_audio(&self, chat: &Chat) -> Option<String> {
        let mut audio = self.audio.try_borrow_mut().ok()?;
        audio
            .next_unplayed(chat)
            .and_then(|m| m.audio_data.clone())
    }

    // ─── Providers and tools ─────────────────────────────────

    pub async fn providers(&self) -> Vec<ProviderState> {
        self.providers.states().await
    }

    pub async fn add_provider(&self, id: &str, transport: TransportConfig) -> Result<ProviderStatus> {
        let result = self.providers.add_and_connect(id, transport).await;
        self.process_lifecycle().await;
        result
    }

    pub async fn connect_provider(&self, id: &str) -> Result<ProviderStatus> {
        let result = self.providers.connect(id).await;
        self.process_lifecycle().await;
        result
    }

    pub async fn disconnect_provider(&self, id: &str) -> Result<()> {
        let result = self.providers.disconnect(id).await;
        self.process_lifecycle().await;
        result
    }

    pub async fn remove_provider(&self, id: &str) -> Result<()> {
        let result = self.providers.remove(id).await;
        self.process_lifecycle().await;
        result
    }

    pub async fn provider_tools(&self, id: &str) -> Result<Vec<ToolDescriptor>> {
        self.providers.provider_tools(id).await
    }

    /// Manual refresh from the UI.
    pub async fn refresh_tools(&self) -> Result<usize> {
        self.providers.events().emit(LifecycleEvent::ToolsRefreshRequested);
        let mut catalog = exclusive(&self.catalog)?;
        catalog.process_events(self.backend.as_ref()).await;
        match catalog.status() {
            CatalogStatus::Failed(e) => Err(OmniError::Other(e.clone())),
            _ => Ok(catalog.tools().len()),
        }
    }

    pub fn tools(&self) -> Vec<ToolDescriptor> {
        self.catalog
            .try_borrow()
            .map(|c| c.tools().to_vec())
            .unwrap_or_default()
    }

    pub fn catalog_status(&self) -> CatalogStatus {
        self.catalog
            .try_borrow()
            .map(|c| c.status().clone())
            .unwrap_or(CatalogStatus::Loading)
    }

    async fn process_lifecycle(&self) {
        match exclusive(&self.catalog) {
            Ok(mut catalog) => {
                catalog.process_events(self.backend.as_ref()).await;
            }
            // A refresh already in flight will pick the events up.
            Err(_) => log::debug!("Tool catalog busy, lifecycle events deferred"),
        }
    }
}

fn exclusive<T>(cell: &RefCell<T>) -> Result<RefMut<'_, T>> {
    cell.try_borrow_mut().map_err(|_| OmniError::Busy)
}

/// Saved configuration, or defaults when missing, unreadable or invalid.
pub async fn restore_config(storage: &dyn StoragePort) -> ClientConfig {
    let data = match storage.get(CONFIG_KEY).await {
        Ok(Some(data)) => data,
        Ok(None) => return ClientConfig::default(),
        Err(e) => {
            log::warn!("Could not read saved config: {}", e);
            return ClientConfig::default();
        }
    };
    match serde_json::from_slice::<ClientConfig>(&data) {
        Ok(config) => match config.validate() {
            Ok(()) => {
                log::info!("Config restored from storage");
                config
            }
            Err(e) => {
                log::warn!("Saved config rejected ({}), using defaults", e);
                ClientConfig::default()
            }
        },
        Err(e) => {
            log::warn!("Saved config unreadable ({}), using defaults", e);
            ClientConfig::default()
        }
    }
}

pub async fn save_config(storage: &dyn StoragePort, config: &ClientConfig) -> Result<()> {
    config.validate()?;
    let json = serde_json::to_vec(config)?;
    storage.set(CONFIG_KEY, &json).await?;
    log::info!("Config saved to storage");
    Ok(())
}
