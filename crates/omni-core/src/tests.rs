#[cfg(test)]
mod tests {
    use crate::audio::{decode_audio, AudioPlaybackTracker};
    use crate::catalog::{CatalogStatus, ToolCatalog};
    use crate::collection::JsonCollection;
    use crate::event_bus::EventBus;
    use crate::history::ChatHistory;
    use crate::orchestrator::*;
    use crate::ports::*;
    use crate::providers::{ProviderManager, PROVIDERS_KEY};
    use crate::repository::{ConversationRepository, CHATS_KEY};
    use omni_types::chat::*;
    use omni_types::event::*;
    use omni_types::message::*;
    use omni_types::provider::*;
    use omni_types::tool::ToolDescriptor;
    use omni_types::{OmniError, Result};
    use async_trait::async_trait;
    use futures::executor::block_on;
    use serde_json::json;
    use std::cell::{Cell, RefCell};
    use std::collections::{BTreeMap, HashMap, VecDeque};
    use std::rc::Rc;

    // ─── Mocks ───────────────────────────────────────────────

    /// In-memory store; cloning the Rc simulates a second context.
    #[derive(Default)]
    struct MockStorage {
        data: RefCell<HashMap<String, Vec<u8>>>,
        changes: EventBus<StorageChange>,
        fail_reads: Cell<bool>,
        fail_writes: Cell<bool>,
    }

    #[async_trait(?Send)]
    impl StoragePort for MockStorage {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            if self.fail_reads.get() {
                return Err(OmniError::Storage("medium unavailable".to_string()));
            }
            Ok(self.data.borrow().get(key).cloned())
        }

        async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
            if self.fail_writes.get() {
                return Err(OmniError::Storage("QuotaExceededError".to_string()));
            }
            self.data.borrow_mut().insert(key.to_string(), value.to_vec());
            self.changes.emit(StorageChange::new(key));
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.data.borrow_mut().remove(key);
            self.changes.emit(StorageChange::new(key));
            Ok(())
        }

        async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
            Ok(self.data.borrow().keys().filter(|k| k.starts_with(prefix)).cloned().collect())
        }

        fn subscribe_changes(&self) -> crate::event_bus::Subscription<StorageChange> {
            self.changes.subscribe()
        }

        fn backend_name(&self) -> &str {
            "mock"
        }
    }

    fn storage() -> Rc<MockStorage> {
        Rc::new(MockStorage::default())
    }

    fn repo(storage: &Rc<MockStorage>) -> Rc<ConversationRepository> {
        Rc::new(ConversationRepository::new(storage.clone()))
    }

    #[derive(Default)]
    struct MockAuthority {
        remote: RefCell<BTreeMap<String, RemoteProvider>>,
        failing: RefCell<Vec<String>>,
        fail_disconnect: Cell<bool>,
        fail_remove: Cell<bool>,
        connect_calls: RefCell<Vec<String>>,
    }

    impl MockAuthority {
        fn with_remote(self, id: &str, status: ProviderStatus, config: serde_json::Value) -> Self {
            self.remote.borrow_mut().insert(
                id.to_string(),
                RemoteProvider { id: id.to_string(), status, config, error: None },
            );
            self
        }
    }

    #[async_trait(?Send)]
    impl ProviderAuthorityPort for MockAuthority {
        async fn list_providers(&self) -> Result<Vec<RemoteProvider>> {
            Ok(self.remote.borrow().values().cloned().collect())
        }

        async fn connect(&self, id: &str, transport: &TransportConfig) -> Result<ConnectOutcome> {
            self.connect_calls.borrow_mut().push(id.to_string());
            if self.failing.borrow().iter().any(|f| f == id) {
                return Ok(ConnectOutcome {
                    success: false,
                    status: "disconnected".to_string(),
                    error: Some("Command 'missing' not found in PATH".to_string()),
                });
            }
            self.remote.borrow_mut().insert(
                id.to_string(),
                RemoteProvider {
                    id: id.to_string(),
                    status: ProviderStatus::Connected,
                    config: transport.to_server_config(),
                    error: None,
                },
            );
            Ok(ConnectOutcome {
                success: true,
                status: "connected (2 tools)".to_string(),
                error: None,
            })
        }

        async fn disconnect(&self, id: &str) -> Result<()> {
            if self.fail_disconnect.get() {
                return Err(OmniError::Unreachable("connection reset".to_string()));
            }
            if let Some(p) = self.remote.borrow_mut().get_mut(id) {
                p.status = ProviderStatus::Disconnected;
            }
            Ok(())
        }

        async fn remove(&self, id: &str) -> Result<()> {
            if self.fail_remove.get() {
                return Err(OmniError::Rejected { status: 404, detail: "not found".to_string() });
            }
            self.remote.borrow_mut().remove(id);
            Ok(())
        }

        async fn provider_tools(&self, _id: &str) -> Result<Vec<ToolDescriptor>> {
            Ok(vec![weather_tool()])
        }

        async fn all_tools(&self) -> Result<Vec<ToolDescriptor>> {
            Ok(vec![weather_tool()])
        }
    }

    fn manager(storage: &Rc<MockStorage>, authority: &Rc<MockAuthority>) -> ProviderManager {
        ProviderManager::new(storage.clone(), authority.clone(), EventBus::new())
    }

    #[derive(Default)]
    struct MockBackend {
        responses: RefCell<VecDeque<Result<CompletionResponse>>>,
        requests: RefCell<Vec<CompletionRequest>>,
        tools: RefCell<Vec<ToolDescriptor>>,
        fail_tools: Cell<bool>,
        list_calls: Cell<usize>,
        healthy: Cell<bool>,
    }

    impl MockBackend {
        fn replying(responses: Vec<Result<CompletionResponse>>) -> Self {
            Self {
                responses: RefCell::new(responses.into()),
                healthy: Cell::new(true),
                ..Self::default()
            }
        }
    }

    #[async_trait(?Send)]
    impl InferencePort for MockBackend {
        async fn chat_completion(&self, req: CompletionRequest) -> Result<CompletionResponse> {
            self.requests.borrow_mut().push(req);
            self.responses
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(OmniError::Other("no scripted response".to_string())))
        }

        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
            self.list_calls.set(self.list_calls.get() + 1);
            if self.fail_tools.get() {
                return Err(OmniError::Unreachable("Failed to fetch".to_string()));
            }
            Ok(self.tools.borrow().clone())
        }

        async fn health(&self) -> Result<BackendHealth> {
            if !self.healthy.get() {
                return Err(OmniError::Unreachable("refused".to_string()));
            }
            Ok(BackendHealth {
                status: "healthy".to_string(),
                model_loaded: true,
                model_name: Some("omni".to_string()),
                device: None,
                context_length: None,
            })
        }
    }

    fn weather_tool() -> ToolDescriptor {
        ToolDescriptor::function("get_weather", "Current weather", json!({"type": "object"}))
    }

    fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            id: "omni-1".to_string(),
            model: "omni".to_string(),
            message: WireMessage::text(Role::Assistant, text),
            audio: None,
            conversation_messages: None,
            usage: Some(TokenUsage { prompt_tokens: 1, completion_tokens: 2, total_tokens: 3 }),
        }
    }

    fn tool_call_response() -> CompletionResponse {
        let mut call = WireMessage::text(Role::Assistant, "");
        call.tool_calls = vec![ToolCallRequest::new("t1", "get_weather", r#"{"location":"SF"}"#)];
        let mut result = WireMessage::text(Role::Tool, "72F");
        result.tool_call_id = Some("t1".to_string());
        CompletionResponse {
            conversation_messages: Some(vec![
                WireMessage::text(Role::User, "Weather?"),
                call,
                result,
                WireMessage::text(Role::Assistant, "It's 72F"),
            ]),
            ..text_response("It's 72F")
        }
    }

    fn audio(data: &str) -> Option<AudioOutput> {
        Some(AudioOutput { data: data.to_string(), format: "wav".to_string() })
    }

    fn chat_at(id: &str, updated_at: i64) -> Chat {
        let mut chat = Chat::new(id.to_string());
        chat.created_at = updated_at;
        chat.updated_at = updated_at;
        chat
    }

    // ─── EventBus Tests ──────────────────────────────────────

    #[test]
    fn test_event_bus_each_subscriber_gets_every_event() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.emit(LifecycleEvent::ProviderConnected { id: "search".to_string() });
        bus.emit(LifecycleEvent::ToolsRefreshRequested);

        assert_eq!(a.drain().len(), 2);
        assert!(!a.has_pending());
        assert_eq!(
            b.drain(),
            vec![
                LifecycleEvent::ProviderConnected { id: "search".to_string() },
                LifecycleEvent::ToolsRefreshRequested,
            ]
        );
    }

    #[test]
    fn test_event_bus_late_subscriber_misses_earlier_events() {
        let bus = EventBus::new();
        bus.emit(LifecycleEvent::ToolsRefreshRequested);
        let sub = bus.subscribe();
        assert!(!sub.has_pending());
    }

    #[test]
    fn test_event_bus_dropped_subscription_pruned() {
        let bus: EventBus<LifecycleEvent> = EventBus::new();
        let keep = bus.subscribe();
        {
            let _gone = bus.subscribe();
            assert_eq!(bus.subscriber_count(), 2);
        }
        assert_eq!(bus.subscriber_count(), 1);
        bus.emit(LifecycleEvent::ToolsRefreshRequested);
        assert_eq!(keep.drain().len(), 1);
    }

    #[test]
    fn test_event_bus_clone_shares_subscribers() {
        let bus1 = EventBus::new();
        let bus2 = bus1.clone();
        let sub = bus1.subscribe();
        bus2.emit(TurnEvent::ConnectivityChanged { online: false });
        assert_eq!(sub.drain(), vec![TurnEvent::ConnectivityChanged { online: false }]);
    }

    #[test]
    fn test_event_bus_queue_is_bounded() {
        let bus = EventBus::new();
        let default = bus.subscribe();
        let small = bus.subscribe().with_capacity(2);
        for online in [true, false, true] {
            bus.emit(TurnEvent::ConnectivityChanged { online });
        }

        assert_eq!(default.drain().len(), 3);
        assert_eq!(small.dropped(), 1);
        assert_eq!(
            small.drain(),
            vec![
                TurnEvent::ConnectivityChanged { online: false },
                TurnEvent::ConnectivityChanged { online: true },
            ]
        );
    }

    #[test]
    fn test_event_bus_coalescing_skips_pending_duplicates() {
        let bus = EventBus::new();
        let sub = bus.subscribe().coalescing();
        for key in ["omni:chats", "omni:chats", "omni:config", "omni:chats"] {
            bus.emit(StorageChange::new(key));
        }
        assert_eq!(
            sub.drain(),
            vec![StorageChange::new("omni:chats"), StorageChange::new("omni:config")]
        );

        // Once drained the same key is delivered again.
        bus.emit(StorageChange::new("omni:chats"));
        assert_eq!(sub.drain(), vec![StorageChange::new("omni:chats")]);
        assert_eq!(sub.dropped(), 0);
    }

    #[test]
    fn test_history_collapses_repeated_writes() {
        let storage = storage();
        let repo = repo(&storage);
        let mut history = block_on(ChatHistory::load(repo.clone()));
        for _ in 0..(crate::event_bus::DEFAULT_CAPACITY + 10) {
            block_on(repo.create_chat()).unwrap();
        }
        assert!(block_on(history.sync()));
        assert_eq!(history.chats().len(), 50);
        assert!(!block_on(history.sync()));
    }

    // ─── JsonCollection Tests ────────────────────────────────

    #[test]
    fn test_collection_corrupt_json_reads_empty() {
        let storage = storage();
        block_on(storage.set(CHATS_KEY, b"{not json")).unwrap();
        let collection: JsonCollection<Chat> = JsonCollection::new(storage.clone(), CHATS_KEY);
        assert!(block_on(collection.load()).is_empty());
    }

    #[test]
    fn test_collection_unavailable_medium_reads_empty() {
        let storage = storage();
        let repo = repo(&storage);
        block_on(repo.save_chat(&chat_at("c1", 1))).unwrap();
        storage.fail_reads.set(true);
        assert!(block_on(repo.list_chats()).is_empty());
        assert!(block_on(repo.get_chat("c1")).is_none());
    }

    // ─── ConversationRepository Tests ────────────────────────

    #[test]
    fn test_repository_save_and_get() {
        let storage = storage();
        let repo = repo(&storage);
        let chat = chat_at("c1", 10);
        block_on(repo.save_chat(&chat)).unwrap();
        assert_eq!(block_on(repo.get_chat("c1")), Some(chat));
        assert!(block_on(repo.get_chat("nope")).is_none());
    }

    #[test]
    fn test_repository_upsert_does_not_duplicate() {
        let storage = storage();
        let repo = repo(&storage);
        let mut chat = chat_at("c1", 10);
        block_on(repo.save_chat(&chat)).unwrap();
        chat.title = "Renamed".to_string();
        chat.updated_at = 20;
        block_on(repo.save_chat(&chat)).unwrap();

        let chats = block_on(repo.list_chats());
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].title, "Renamed");
    }

    #[test]
    fn test_repository_caps_to_most_recent() {
        let storage = storage();
        let repo = repo(&storage);
        // Save out of order so the cap cannot rely on insertion order.
        for i in (0..60i64).rev() {
            block_on(repo.save_chat(&chat_at(&format!("c{}", i), 1_000 + i))).unwrap();
        }
        let chats = block_on(repo.list_chats());
        assert_eq!(chats.len(), 50);
        let mut ids: Vec<String> = chats.iter().map(|c| c.id.clone()).collect();
        ids.sort();
        let mut expected: Vec<String> = (10..60).map(|i| format!("c{}", i)).collect();
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_repository_cap_evicts_stale_save() {
        let storage = storage();
        let repo = Rc::new(ConversationRepository::with_capacity(storage.clone(), 2));
        block_on(repo.save_chat(&chat_at("new1", 100))).unwrap();
        block_on(repo.save_chat(&chat_at("new2", 200))).unwrap();
        block_on(repo.save_chat(&chat_at("ancient", 1))).unwrap();
        let chats = block_on(repo.list_chats());
        assert_eq!(chats.len(), 2);
        assert!(chats.iter().all(|c| c.id != "ancient"));
    }

    #[test]
    fn test_repository_stored_most_recent_first() {
        let storage = storage();
        let repo = repo(&storage);
        block_on(repo.save_chat(&chat_at("old", 1))).unwrap();
        block_on(repo.save_chat(&chat_at("new", 2))).unwrap();
        let raw = storage.data.borrow().get(CHATS_KEY).cloned().unwrap();
        let stored: Vec<Chat> = serde_json::from_slice(&raw).unwrap();
        assert_eq!(stored[0].id, "new");
        let summaries = block_on(repo.summaries());
        assert_eq!(summaries[0].id, "new");
        assert_eq!(summaries[1].id, "old");
    }

    #[test]
    fn test_repository_delete_and_clear() {
        let storage = storage();
        let repo = repo(&storage);
        block_on(repo.save_chat(&chat_at("c1", 1))).unwrap();
        block_on(repo.save_chat(&chat_at("c2", 2))).unwrap();

        assert!(block_on(repo.delete_chat("c1")).unwrap());
        assert!(!block_on(repo.delete_chat("c1")).unwrap());
        assert_eq!(block_on(repo.list_chats()).len(), 1);

        block_on(repo.clear_all()).unwrap();
        assert!(block_on(repo.list_chats()).is_empty());
    }

    #[test]
    fn test_repository_append_auto_titles_once() {
        let storage = storage();
        let repo = repo(&storage);
        let chat = block_on(repo.create_chat()).unwrap();
        assert_eq!(chat.title, DEFAULT_CHAT_TITLE);

        let long = format!("  {}  ", "a".repeat(70));
        let after = block_on(repo.append_message(&chat.id, Message::user(long))).unwrap().unwrap();
        assert_eq!(after.title, "a".repeat(50));

        let after = block_on(repo.append_message(&chat.id, Message::user("second"))).unwrap().unwrap();
        assert_eq!(after.title, "a".repeat(50));
        assert_eq!(after.messages.len(), 2);
    }

    #[test]
    fn test_repository_append_blank_user_keeps_sentinel() {
        let storage = storage();
        let repo = repo(&storage);
        let chat = block_on(repo.create_chat()).unwrap();
        let after = block_on(repo.append_message(&chat.id, Message::user("   "))).unwrap().unwrap();
        assert_eq!(after.title, DEFAULT_CHAT_TITLE);
    }

    #[test]
    fn test_repository_append_refreshes_updated_at() {
        let storage = storage();
        let repo = repo(&storage);
        block_on(repo.save_chat(&chat_at("c1", 5))).unwrap();
        let after = block_on(repo.append_message("c1", Message::user("hi"))).unwrap().unwrap();
        assert!(after.updated_at > 5);
    }

    #[test]
    fn test_repository_append_missing_chat_is_noop() {
        let storage = storage();
        let repo = repo(&storage);
        let result = block_on(repo.append_message("ghost", Message::user("hi"))).unwrap();
        assert!(result.is_none());
        assert!(block_on(repo.list_chats()).is_empty());
    }

    #[test]
    fn test_repository_round_trip_through_fresh_instance() {
        let storage = storage();
        let chat = {
            let repo = repo(&storage);
            let chat = block_on(repo.create_chat()).unwrap();
            let user = Message::user("Describe this")
                .with_image(MediaPayload::from_bytes("image/png", &[9, 9, 9]));
            let mut reply = Message::assistant("A cat");
            reply.audio_data = Some("UklGRg==".to_string());
            block_on(repo.append_messages(&chat.id, vec![user, reply])).unwrap().unwrap()
        };

        let reloaded = repo(&storage);
        assert_eq!(block_on(reloaded.get_chat(&chat.id)), Some(chat));
    }

    #[test]
    fn test_repository_read_before_write_keeps_other_context_writes() {
        let storage = storage();
        let tab_a = repo(&storage);
        let tab_b = repo(&storage);
        let chat = block_on(tab_a.create_chat()).unwrap();

        block_on(tab_a.append_message(&chat.id, Message::user("from a"))).unwrap();
        block_on(tab_b.append_message(&chat.id, Message::user("from b"))).unwrap();

        let stored = block_on(tab_a.get_chat(&chat.id)).unwrap();
        let contents: Vec<&str> = stored.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["from a", "from b"]);
    }

    #[test]
    fn test_repository_search() {
        let storage = storage();
        let repo = repo(&storage);
        let mut older = chat_at("older", 1);
        older.messages.push(Message::user("Recipe for PAELLA"));
        let mut newer = chat_at("newer", 2);
        newer.title = "Paella variations".to_string();
        let other = chat_at("other", 3);
        for chat in [&older, &newer, &other] {
            block_on(repo.save_chat(chat)).unwrap();
        }

        let found = block_on(repo.search("paella"));
        let ids: Vec<&str> = found.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["newer", "older"]);
        assert_eq!(block_on(repo.search("")).len(), 3);
    }

    #[test]
    fn test_repository_rename() {
        let storage = storage();
        let repo = repo(&storage);
        block_on(repo.save_chat(&chat_at("c1", 1))).unwrap();
        let renamed = block_on(repo.rename_chat("c1", "  Road trip ")).unwrap().unwrap();
        assert_eq!(renamed.title, "Road trip");
        assert!(renamed.updated_at > 1);
        assert!(block_on(repo.rename_chat("ghost", "x")).unwrap().is_none());
    }

    // ─── ChatHistory Tests ───────────────────────────────────

    #[test]
    fn test_history_does_not_auto_select() {
        let storage = storage();
        let repo = repo(&storage);
        block_on(repo.save_chat(&chat_at("c1", 1))).unwrap();
        let history = block_on(ChatHistory::load(repo));
        assert_eq!(history.chats().len(), 1);
        assert!(history.current_id().is_none());
        assert!(block_on(history.current_chat()).is_none());
    }

    #[test]
    fn test_history_new_chat_selects_it() {
        let storage = storage();
        let mut history = block_on(ChatHistory::load(repo(&storage)));
        let chat = block_on(history.new_chat()).unwrap();
        assert_eq!(history.current_id(), Some(chat.id.as_str()));
        assert_eq!(block_on(history.current_chat()).unwrap().id, chat.id);
    }

    #[test]
    fn test_history_sync_sees_other_context_writes() {
        let storage = storage();
        let mut history = block_on(ChatHistory::load(repo(&storage)));
        let other_tab = repo(&storage);
        block_on(other_tab.save_chat(&chat_at("elsewhere", 5))).unwrap();

        assert!(history.chats().is_empty());
        assert!(block_on(history.sync()));
        assert_eq!(history.chats()[0].id, "elsewhere");
        assert!(!block_on(history.sync()));
    }

    #[test]
    fn test_history_sync_ignores_unrelated_keys() {
        let storage = storage();
        let mut history = block_on(ChatHistory::load(repo(&storage)));
        block_on(storage.set(PROVIDERS_KEY, b"[]")).unwrap();
        assert!(!block_on(history.sync()));
    }

    #[test]
    fn test_history_current_chat_falls_back_to_store() {
        let storage = storage();
        let mut history = block_on(ChatHistory::load(repo(&storage)));
        let other_tab = repo(&storage);
        let chat = block_on(other_tab.create_chat()).unwrap();

        history.select(Some(chat.id.clone()));
        // Listing not synced yet, the store still resolves it.
        assert!(history.chats().is_empty());
        assert_eq!(block_on(history.current_chat()).unwrap().id, chat.id);
    }

    #[test]
    fn test_history_delete_current_clears_selection() {
        let storage = storage();
        let mut history = block_on(ChatHistory::load(repo(&storage)));
        let chat = block_on(history.new_chat()).unwrap();
        block_on(history.delete(&chat.id)).unwrap();
        assert!(history.current_id().is_none());
        assert!(history.chats().is_empty());
    }

    #[test]
    fn test_history_filtered_and_clear() {
        let storage = storage();
        let repo = repo(&storage);
        let mut a = chat_at("a", 1);
        a.title = "Budget".to_string();
        block_on(repo.save_chat(&a)).unwrap();
        block_on(repo.save_chat(&chat_at("b", 2))).unwrap();
        let mut history = block_on(ChatHistory::load(repo));

        assert_eq!(history.filtered("budget").len(), 1);
        assert_eq!(history.filtered("").len(), 2);
        block_on(history.clear()).unwrap();
        assert!(history.chats().is_empty());
    }

    // ─── ProviderManager Tests ───────────────────────────────

    #[test]
    fn test_add_process_without_command_rejected_before_connect() {
        let storage = storage();
        let authority = Rc::new(MockAuthority::default());
        let manager = manager(&storage, &authority);

        let result = block_on(manager.add_and_connect("files", TransportConfig::process("", vec![])));
        assert!(matches!(result, Err(OmniError::Validation(_))));
        assert!(authority.connect_calls.borrow().is_empty());
        assert!(block_on(manager.configs()).is_empty());
    }

    #[test]
    fn test_add_http_without_url_rejected() {
        let storage = storage();
        let authority = Rc::new(MockAuthority::default());
        let manager = manager(&storage, &authority);
        let result = block_on(manager.add_and_connect("search", TransportConfig::http("  ")));
        assert!(matches!(result, Err(OmniError::Validation(_))));
        assert!(authority.connect_calls.borrow().is_empty());
        assert!(!storage.data.borrow().contains_key(PROVIDERS_KEY));
    }

    #[test]
    fn test_add_and_connect_success() {
        let storage = storage();
        let authority = Rc::new(MockAuthority::default());
        let manager = manager(&storage, &authority);
        let events = manager.events().subscribe();

        let status = block_on(manager.add_and_connect("search", TransportConfig::http("http://s/mcp"))).unwrap();
        assert_eq!(status, ProviderStatus::Connected);
        assert_eq!(manager.status("search"), ProviderStatus::Connected);

        let config = block_on(manager.config("search")).unwrap();
        assert!(config.last_connected_at.is_some());
        assert_eq!(
            events.drain(),
            vec![LifecycleEvent::ProviderConnected { id: "search".to_string() }]
        );
    }

    #[test]
    fn test_connect_failure_surfaces_error() {
        let storage = storage();
        let authority = Rc::new(MockAuthority::default());
        authority.failing.borrow_mut().push("files".to_string());
        let manager = manager(&storage, &authority);
        let events = manager.events().subscribe();

        let result = block_on(manager.add_and_connect("files", TransportConfig::process("missing", vec![])));
        let err = result.unwrap_err();
        assert!(err.to_string().contains("not found in PATH"));
        assert_eq!(manager.status("files"), ProviderStatus::Disconnected);
        assert!(manager.last_error("files").is_some());

        // Intent is remembered, connected state is not.
        let config = block_on(manager.config("files")).unwrap();
        assert!(config.last_connected_at.is_none());
        assert!(events.drain().is_empty());
    }

    #[test]
    fn test_connect_resolves_when_store_is_full() {
        let storage = storage();
        let authority = Rc::new(MockAuthority::default());
        let manager = manager(&storage, &authority);
        block_on(manager.add_and_connect("search", TransportConfig::http("http://s"))).unwrap();
        block_on(manager.disconnect("search")).unwrap();
        let events = manager.events().subscribe();

        storage.fail_writes.set(true);
        let status = block_on(manager.connect("search")).unwrap();
        assert_eq!(status, ProviderStatus::Connected);
        assert_eq!(manager.status("search"), ProviderStatus::Connected);
        assert_eq!(
            authority.remote.borrow().get("search").map(|p| p.status),
            Some(ProviderStatus::Connected)
        );
        assert_eq!(
            events.drain(),
            vec![LifecycleEvent::ProviderConnected { id: "search".to_string() }]
        );
    }

    #[test]
    fn test_connect_unknown_provider_is_noop() {
        let storage = storage();
        let authority = Rc::new(MockAuthority::default());
        let manager = manager(&storage, &authority);
        assert_eq!(block_on(manager.connect("ghost")).unwrap(), ProviderStatus::Disconnected);
        assert!(authority.connect_calls.borrow().is_empty());
    }

    #[test]
    fn test_disconnect_emits_even_when_remote_fails() {
        let storage = storage();
        let authority = Rc::new(MockAuthority::default());
        let manager = manager(&storage, &authority);
        block_on(manager.add_and_connect("search", TransportConfig::http("http://s"))).unwrap();
        let events = manager.events().subscribe();

        authority.fail_disconnect.set(true);
        assert!(block_on(manager.disconnect("search")).is_err());
        assert_eq!(manager.status("search"), ProviderStatus::Disconnected);
        assert_eq!(
            events.drain(),
            vec![LifecycleEvent::ProviderDisconnected { id: "search".to_string() }]
        );
    }

    #[test]
    fn test_remove_tolerates_remote_failure() {
        let storage = storage();
        let authority = Rc::new(MockAuthority::default());
        let manager = manager(&storage, &authority);
        block_on(manager.add_and_connect("search", TransportConfig::http("http://s"))).unwrap();
        let events = manager.events().subscribe();

        authority.fail_remove.set(true);
        block_on(manager.remove("search")).unwrap();
        assert!(block_on(manager.configs()).is_empty());
        assert_eq!(manager.status("search"), ProviderStatus::Disconnected);
        assert_eq!(
            events.drain(),
            vec![LifecycleEvent::ProviderDisconnected { id: "search".to_string() }]
        );
    }

    #[test]
    fn test_status_never_persisted() {
        let storage = storage();
        let authority = Rc::new(MockAuthority::default());
        let manager = manager(&storage, &authority);
        block_on(manager.add_and_connect("search", TransportConfig::http("http://s"))).unwrap();

        let raw = String::from_utf8(storage.data.borrow().get(PROVIDERS_KEY).cloned().unwrap()).unwrap();
        assert!(!raw.contains("status"));

        // A fresh manager over the same store knows nothing about status.
        let fresh = ProviderManager::new(storage.clone(), authority.clone(), EventBus::new());
        assert_eq!(fresh.status("search"), ProviderStatus::Disconnected);
        assert_eq!(block_on(fresh.states()).len(), 1);
    }

    #[test]
    fn test_reconcile_registers_local_only_providers() {
        let storage = storage();
        let authority = Rc::new(MockAuthority::default());
        let collection: JsonCollection<ProviderConfig> = JsonCollection::new(storage.clone(), PROVIDERS_KEY);
        block_on(collection.store(&[ProviderConfig::new("files", TransportConfig::process("npx", vec![]))])).unwrap();

        let manager = manager(&storage, &authority);
        let events = manager.events().subscribe();
        block_on(manager.reconcile()).unwrap();

        assert_eq!(*authority.connect_calls.borrow(), vec!["files".to_string()]);
        assert_eq!(manager.status("files"), ProviderStatus::Connected);
        assert_eq!(events.drain().len(), 1);
    }

    #[test]
    fn test_reconcile_local_transport_wins_remote_status_wins() {
        let storage = storage();
        let local = TransportConfig::process("uvx", vec!["fresh-server".to_string()]);
        let collection: JsonCollection<ProviderConfig> = JsonCollection::new(storage.clone(), PROVIDERS_KEY);
        block_on(collection.store(&[ProviderConfig::new("files", local.clone())])).unwrap();

        let authority = Rc::new(MockAuthority::default().with_remote(
            "files",
            ProviderStatus::Connected,
            json!({"command": "stale-command"}),
        ));
        let manager = manager(&storage, &authority);
        block_on(manager.reconcile()).unwrap();

        assert_eq!(block_on(manager.config("files")).unwrap().transport, local);
        assert_eq!(manager.status("files"), ProviderStatus::Connected);
        assert!(authority.connect_calls.borrow().is_empty());
    }

    #[test]
    fn test_reconcile_adopts_remote_only_provider() {
        let storage = storage();
        let authority = Rc::new(
            MockAuthority::default()
                .with_remote("web", ProviderStatus::Connected, json!({"url": "http://w/mcp"}))
                .with_remote("junk", ProviderStatus::Connected, json!({"weird": true})),
        );
        let manager = manager(&storage, &authority);
        block_on(manager.reconcile()).unwrap();

        let configs = block_on(manager.configs());
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].transport, TransportConfig::http("http://w/mcp"));
        assert_eq!(manager.status("web"), ProviderStatus::Connected);
    }

    #[test]
    fn test_reconcile_keeps_config_when_registration_fails() {
        let storage = storage();
        let collection: JsonCollection<ProviderConfig> = JsonCollection::new(storage.clone(), PROVIDERS_KEY);
        block_on(collection.store(&[ProviderConfig::new("files", TransportConfig::process("missing", vec![]))])).unwrap();
        let authority = Rc::new(MockAuthority::default());
        authority.failing.borrow_mut().push("files".to_string());

        let manager = manager(&storage, &authority);
        block_on(manager.reconcile()).unwrap();
        assert_eq!(block_on(manager.configs()).len(), 1);
        assert_eq!(manager.status("files"), ProviderStatus::Disconnected);
        assert!(manager.last_error("files").is_some());
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let storage = storage();
        let collection: JsonCollection<ProviderConfig> = JsonCollection::new(storage.clone(), PROVIDERS_KEY);
        block_on(collection.store(&[
            ProviderConfig::new("files", TransportConfig::process("npx", vec![])),
            ProviderConfig::new("broken", TransportConfig::process("missing", vec![])),
        ]))
        .unwrap();
        let authority = Rc::new(
            MockAuthority::default().with_remote("web", ProviderStatus::Disconnected, json!({"url": "http://w"})),
        );
        authority.failing.borrow_mut().push("broken".to_string());
        let manager = manager(&storage, &authority);

        block_on(manager.reconcile()).unwrap();
        let once_configs = block_on(manager.configs());
        let once_states = block_on(manager.states());

        block_on(manager.reconcile()).unwrap();
        assert_eq!(block_on(manager.configs()), once_configs);
        let twice_states = block_on(manager.states());
        let statuses = |s: &[ProviderState]| s.iter().map(|p| (p.config.id.clone(), p.status)).collect::<Vec<_>>();
        assert_eq!(statuses(&twice_states), statuses(&once_states));
    }

    // ─── ToolCatalog Tests ───────────────────────────────────

    #[test]
    fn test_catalog_refreshes_once_per_connected_provider() {
        let storage = storage();
        let authority = Rc::new(MockAuthority::default());
        let manager = manager(&storage, &authority);
        let mut catalog = ToolCatalog::new(manager.events());
        let backend = MockBackend::default();
        *backend.tools.borrow_mut() = vec![weather_tool()];

        let before = catalog.refresh_count();
        block_on(manager.add_and_connect("search", TransportConfig::http("http://s"))).unwrap();
        block_on(manager.add_and_connect("files", TransportConfig::process("npx", vec![]))).unwrap();
        let ran = block_on(catalog.process_events(&backend));

        assert_eq!(ran, 2);
        assert_eq!(catalog.refresh_count() - before, 2);
        assert_eq!(backend.list_calls.get(), 2);
        assert_eq!(catalog.status(), &CatalogStatus::Ready);
        assert!(catalog.get("get_weather").is_some());
    }

    #[test]
    fn test_catalog_status_distinguishes_empty_and_failed() {
        let bus = EventBus::new();
        let mut catalog = ToolCatalog::new(&bus);
        assert_eq!(catalog.status(), &CatalogStatus::Idle);

        let backend = MockBackend::default();
        block_on(catalog.refresh(&backend)).unwrap();
        assert_eq!(catalog.status(), &CatalogStatus::Ready);
        assert!(catalog.tools().is_empty());

        *backend.tools.borrow_mut() = vec![weather_tool()];
        block_on(catalog.refresh(&backend)).unwrap();
        backend.fail_tools.set(true);
        assert!(block_on(catalog.refresh(&backend)).is_err());
        assert!(matches!(catalog.status(), CatalogStatus::Failed(_)));
        // The last good snapshot is kept.
        assert_eq!(catalog.tools().len(), 1);
    }

    #[test]
    fn test_catalog_manual_refresh_and_dedup() {
        let bus = EventBus::new();
        let mut catalog = ToolCatalog::new(&bus);
        let backend = MockBackend::default();
        *backend.tools.borrow_mut() = vec![weather_tool(), weather_tool()];

        bus.emit(LifecycleEvent::ToolsRefreshRequested);
        assert_eq!(block_on(catalog.process_events(&backend)), 1);
        assert_eq!(catalog.tools().len(), 1);
        assert_eq!(block_on(catalog.process_events(&backend)), 0);
    }

    // ─── TurnOrchestrator Tests ──────────────────────────────

    fn orchestrator(repo: &Rc<ConversationRepository>) -> (TurnOrchestrator, crate::event_bus::Subscription<TurnEvent>) {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        (TurnOrchestrator::new(repo.clone(), bus), sub)
    }

    #[test]
    fn test_scenario_simple_text_turn() {
        let storage = storage();
        let repo = repo(&storage);
        let chat = block_on(repo.create_chat()).unwrap();
        let (mut orch, _events) = orchestrator(&repo);
        let backend = MockBackend::replying(vec![Ok(text_response("Hi there"))]);

        let outcome = block_on(orch.run_turn(Some(&chat.id), TurnInput::text("Hello"), false, &[], &backend)).unwrap();
        assert!(outcome.error.is_none());

        let stored = block_on(repo.get_chat(&chat.id)).unwrap();
        assert_eq!(stored.messages.len(), 2);
        assert_eq!(stored.messages[0].role, Role::User);
        assert_eq!(stored.messages[0].content, "Hello");
        assert_eq!(stored.messages[1].role, Role::Assistant);
        assert_eq!(stored.messages[1].content, "Hi there");
        assert_eq!(stored.title, "Hello");

        // Simple path: only the new user message is sent, no tools.
        let requests = backend.requests.borrow();
        assert_eq!(requests[0].messages.len(), 1);
        assert!(requests[0].tools.is_empty());
    }

    #[test]
    fn test_scenario_expanded_tool_messages() {
        let storage = storage();
        let repo = repo(&storage);
        let chat = block_on(repo.create_chat()).unwrap();
        let (mut orch, _events) = orchestrator(&repo);
        let backend = MockBackend::replying(vec![Ok(tool_call_response())]);

        let outcome = block_on(orch.run_turn(
            Some(&chat.id),
            TurnInput::text("Weather?"),
            true,
            &[weather_tool()],
            &backend,
        ))
        .unwrap();
        assert_eq!(outcome.appended.len(), 3);

        let stored = block_on(repo.get_chat(&chat.id)).unwrap();
        let roles: Vec<Role> = stored.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
        assert_eq!(stored.messages[1].tool_calls[0].id, "t1");
        assert_eq!(stored.messages[2].tool_call_id.as_deref(), Some("t1"));
        assert_eq!(stored.messages[2].content, "72F");
        assert_eq!(stored.messages[3].content, "It's 72F");
        assert_eq!(stored.messages.iter().filter(|m| m.role == Role::User).count(), 1);
        assert!(stored.tool_links_valid());
        assert!(stored.messages.windows(2).all(|w| w[0].timestamp < w[1].timestamp));

        assert_eq!(backend.requests.borrow()[0].tools.len(), 1);
    }

    #[test]
    fn test_scenario_network_error() {
        let storage = storage();
        let repo = repo(&storage);
        let chat = block_on(repo.create_chat()).unwrap();
        let (mut orch, events) = orchestrator(&repo);
        let backend = MockBackend::replying(vec![Err(OmniError::Unreachable(
            "Failed to fetch http://localhost:8665".to_string(),
        ))]);

        let outcome = block_on(orch.run_turn(Some(&chat.id), TurnInput::text("Hello"), false, &[], &backend)).unwrap();
        assert!(outcome.error.is_some());
        assert!(!orch.is_online());
        assert!(matches!(orch.state(), TurnState::Failed(_)));

        let stored = block_on(repo.get_chat(&chat.id)).unwrap();
        assert_eq!(stored.messages.len(), 2);
        assert_eq!(stored.messages[0].content, "Hello");
        assert_eq!(stored.messages[1].role, Role::Assistant);
        assert!(stored.messages[1].content.contains("Failed to fetch http://localhost:8665"));
        assert!(events
            .drain()
            .contains(&TurnEvent::ConnectivityChanged { online: false }));
    }

    #[test]
    fn test_success_after_failure_restores_online() {
        let storage = storage();
        let repo = repo(&storage);
        let (mut orch, events) = orchestrator(&repo);
        let backend = MockBackend::replying(vec![
            Err(OmniError::Timeout(300_000)),
            Ok(text_response("back")),
        ]);

        let first = block_on(orch.run_turn(None, TurnInput::text("one"), false, &[], &backend)).unwrap();
        assert!(!orch.is_online());
        block_on(orch.run_turn(Some(&first.chat_id), TurnInput::text("two"), false, &[], &backend)).unwrap();
        assert!(orch.is_online());
        assert_eq!(orch.state(), &TurnState::Idle);

        let changes: Vec<TurnEvent> = events
            .drain()
            .into_iter()
            .filter(|e| matches!(e, TurnEvent::ConnectivityChanged { .. }))
            .collect();
        assert_eq!(
            changes,
            vec![
                TurnEvent::ConnectivityChanged { online: false },
                TurnEvent::ConnectivityChanged { online: true },
            ]
        );
    }

    #[test]
    fn test_rejection_shown_verbatim_and_stays_online() {
        let storage = storage();
        let repo = repo(&storage);
        let (mut orch, _events) = orchestrator(&repo);
        let backend = MockBackend::replying(vec![Err(OmniError::Rejected {
            status: 400,
            detail: "Last message must be from user".to_string(),
        })]);

        let outcome = block_on(orch.run_turn(None, TurnInput::text("hi"), false, &[], &backend)).unwrap();
        assert_eq!(outcome.appended[0].content, "Last message must be from user");
        assert!(orch.is_online());
    }

    #[test]
    fn test_missing_or_absent_chat_creates_one() {
        let storage = storage();
        let repo = repo(&storage);
        let (mut orch, _events) = orchestrator(&repo);
        let backend = MockBackend::replying(vec![Ok(text_response("a")), Ok(text_response("b"))]);

        let first = block_on(orch.run_turn(None, TurnInput::text("new"), false, &[], &backend)).unwrap();
        let second = block_on(orch.run_turn(Some("deleted-id"), TurnInput::text("again"), false, &[], &backend)).unwrap();
        assert_ne!(first.chat_id, second.chat_id);
        assert_ne!(second.chat_id, "deleted-id");
        assert_eq!(block_on(repo.list_chats()).len(), 2);
    }

    #[test]
    fn test_empty_input_rejected_without_writes() {
        let storage = storage();
        let repo = repo(&storage);
        let (mut orch, _events) = orchestrator(&repo);
        let backend = MockBackend::default();
        let result = block_on(orch.run_turn(None, TurnInput::text("   "), false, &[], &backend));
        assert!(matches!(result, Err(OmniError::Validation(_))));
        assert!(block_on(repo.list_chats()).is_empty());
        assert!(backend.requests.borrow().is_empty());
    }

    #[test]
    fn test_history_sends_media_only_for_user_messages() {
        let storage = storage();
        let repo = repo(&storage);
        let chat = block_on(repo.create_chat()).unwrap();
        let mut reply = Message::assistant("Here is a song");
        reply.audio_data = Some("QVVESU8=".to_string());
        reply.image = Some(MediaPayload::from_bytes("image/png", &[1]));
        block_on(repo.append_messages(
            &chat.id,
            vec![Message::user("Sing").with_image(MediaPayload::from_bytes("image/png", &[2])), reply],
        ))
        .unwrap();

        let (mut orch, _events) = orchestrator(&repo);
        let backend = MockBackend::replying(vec![Ok(text_response("ok"))]);
        let video = MediaPayload::from_bytes("video/mp4", &[3, 4]);
        block_on(orch.run_turn(
            Some(&chat.id),
            TurnInput::text("And this?").with_video(video.clone()),
            false,
            &[],
            &backend,
        ))
        .unwrap();

        let requests = backend.requests.borrow();
        let sent = &requests[0].messages;
        assert_eq!(sent.len(), 3);
        assert!(sent[0].image.as_deref().unwrap().starts_with("data:image/png;base64,"));
        assert_eq!(sent[1].role, Role::Assistant);
        assert!(sent[1].image.is_none());
        assert!(sent[1].audio.is_none());
        assert_eq!(sent[2].video, Some(video.to_data_url()));
    }

    #[test]
    fn test_full_history_prepends_system_prompt() {
        let storage = storage();
        let repo = repo(&storage);
        let bus = EventBus::new();
        let mut orch = TurnOrchestrator::new(repo.clone(), bus)
            .with_system_prompt(Some("You are Omni.".to_string()));
        let backend = MockBackend::replying(vec![Ok(text_response("ok"))]);

        block_on(orch.run_turn(None, TurnInput::text("hi"), true, &[], &backend)).unwrap();
        let requests = backend.requests.borrow();
        assert_eq!(requests[0].messages[0].role, Role::System);
        assert_eq!(requests[0].messages[1].content, "hi");
    }

    #[test]
    fn test_tool_history_forces_full_path() {
        let storage = storage();
        let repo = repo(&storage);
        let chat = block_on(repo.create_chat()).unwrap();
        let (mut orch, _events) = orchestrator(&repo);
        let backend = MockBackend::replying(vec![Ok(tool_call_response()), Ok(text_response("sure"))]);

        block_on(orch.run_turn(Some(&chat.id), TurnInput::text("Weather?"), true, &[weather_tool()], &backend)).unwrap();
        block_on(orch.run_turn(Some(&chat.id), TurnInput::text("Thanks"), false, &[weather_tool()], &backend)).unwrap();

        let requests = backend.requests.borrow();
        // user, assistant(call), tool, assistant, new user
        assert_eq!(requests[1].messages.len(), 5);
        assert_eq!(requests[1].messages[2].tool_call_id.as_deref(), Some("t1"));
        assert!(requests[1].tools.is_empty());
    }

    #[test]
    fn test_audio_attached_to_final_assistant_only() {
        let storage = storage();
        let repo = repo(&storage);
        let (mut orch, _events) = orchestrator(&repo);
        let response = CompletionResponse {
            audio: audio("UklGRgAAAAA="),
            ..tool_call_response()
        };
        let backend = MockBackend::replying(vec![Ok(response)]);

        let outcome = block_on(orch.run_turn(None, TurnInput::text("Weather?"), true, &[], &backend)).unwrap();
        let with_audio: Vec<&Message> = outcome.appended.iter().filter(|m| m.audio_data.is_some()).collect();
        assert_eq!(with_audio.len(), 1);
        assert_eq!(with_audio[0].content, "It's 72F");
    }

    #[test]
    fn test_single_reply_carries_audio_and_tool_calls() {
        let storage = storage();
        let repo = repo(&storage);
        let (mut orch, _events) = orchestrator(&repo);
        let mut response = text_response("Speaking");
        response.audio = audio("UklGRg==");
        let backend = MockBackend::replying(vec![Ok(response)]);

        let outcome = block_on(orch.run_turn(None, TurnInput::text("Say hi"), false, &[], &backend)).unwrap();
        assert_eq!(outcome.appended.len(), 1);
        assert_eq!(outcome.appended[0].audio_data.as_deref(), Some("UklGRg=="));
    }

    #[test]
    fn test_orphan_tool_results_dropped() {
        let chat = Chat::new("c".to_string());
        let mut orphan = WireMessage::text(Role::Tool, "stray");
        orphan.tool_call_id = Some("nope".to_string());
        let mut unlinked = WireMessage::text(Role::Tool, "no id");
        unlinked.tool_call_id = None;
        let response = CompletionResponse {
            conversation_messages: Some(vec![orphan, unlinked, WireMessage::text(Role::Assistant, "done")]),
            ..text_response("done")
        };

        let messages = expand_response(&chat, response, 1_000);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::Assistant);
        assert_eq!(messages[0].timestamp, 1_000);
    }

    #[test]
    fn test_tool_result_may_answer_call_from_earlier_turn() {
        let mut chat = Chat::new("c".to_string());
        chat.push_message(
            Message::assistant("").with_tool_calls(vec![ToolCallRequest::new("early", "search", "{}")]),
        );
        let mut late = WireMessage::text(Role::Tool, "result");
        late.tool_call_id = Some("early".to_string());
        let response = CompletionResponse {
            conversation_messages: Some(vec![late]),
            ..text_response("")
        };
        let messages = expand_response(&chat, response, 1);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::Tool);
    }

    #[test]
    fn test_turn_events_in_order() {
        let storage = storage();
        let repo = repo(&storage);
        let (mut orch, events) = orchestrator(&repo);
        let backend = MockBackend::replying(vec![Ok(text_response("hi"))]);
        let outcome = block_on(orch.run_turn(None, TurnInput::text("hello"), false, &[], &backend)).unwrap();
        let id = outcome.chat_id;

        assert_eq!(
            events.drain(),
            vec![
                TurnEvent::TurnStart { chat_id: id.clone() },
                TurnEvent::MessageAppended { chat_id: id.clone(), role: Role::User },
                TurnEvent::MessageAppended { chat_id: id.clone(), role: Role::Assistant },
                TurnEvent::TurnEnd { chat_id: id },
            ]
        );
        assert_eq!(orch.turn_count(), 1);
        assert!(!orch.is_busy());
    }

    #[test]
    fn test_turn_ends_when_user_message_cannot_be_stored() {
        let storage = storage();
        let repo = repo(&storage);
        let chat = block_on(repo.create_chat()).unwrap();
        let (mut orch, events) = orchestrator(&repo);
        let backend = MockBackend::replying(vec![Ok(text_response("hi"))]);

        storage.fail_writes.set(true);
        let result = block_on(orch.run_turn(Some(&chat.id), TurnInput::text("hello"), false, &[], &backend));
        assert!(matches!(result, Err(OmniError::Storage(_))));
        assert_eq!(
            events.drain(),
            vec![
                TurnEvent::TurnStart { chat_id: chat.id.clone() },
                TurnEvent::TurnEnd { chat_id: chat.id.clone() },
            ]
        );
        assert!(matches!(orch.state(), TurnState::Failed(_)));
        assert!(!orch.is_busy());
        assert!(backend.requests.borrow().is_empty());
    }

    #[test]
    fn test_generation_options_forwarded() {
        let storage = storage();
        let repo = repo(&storage);
        let (orch, _events) = orchestrator(&repo);
        let mut orch = orch.with_generation(omni_types::config::GenerationOptions {
            max_tokens: 128,
            temperature: 0.2,
            top_p: 0.5,
            return_audio: true,
        });
        let backend = MockBackend::replying(vec![Ok(text_response("ok"))]);
        block_on(orch.run_turn(None, TurnInput::text("hi"), false, &[], &backend)).unwrap();
        let requests = backend.requests.borrow();
        assert_eq!(requests[0].generation.max_tokens, 128);
        assert!(requests[0].generation.return_audio);
    }

    #[test]
    fn test_probe_tracks_health() {
        let storage = storage();
        let repo = repo(&storage);
        let (mut orch, _events) = orchestrator(&repo);
        let backend = MockBackend::default();
        assert!(!block_on(orch.probe(&backend)));
        backend.healthy.set(true);
        assert!(block_on(orch.probe(&backend)));
    }

    #[test]
    fn test_failure_text() {
        assert_eq!(
            failure_text(&OmniError::Rejected { status: 500, detail: "Generation failed: OOM".to_string() }),
            "Generation failed: OOM"
        );
        assert!(failure_text(&OmniError::Timeout(5)).starts_with("Error: "));
    }

    // ─── Audio Tests ─────────────────────────────────────────

    #[test]
    fn test_audio_tracker_plays_each_reply_once() {
        let mut chat = Chat::new("c".to_string());
        let mut reply = Message::assistant("hi").with_timestamp(10);
        reply.audio_data = Some("UklGRg==".to_string());
        chat.messages.push(reply);

        let mut tracker = AudioPlaybackTracker::new();
        assert_eq!(tracker.next_unplayed(&chat).unwrap().timestamp, 10);
        assert!(tracker.next_unplayed(&chat).is_none());
        assert!(tracker.is_played(&chat.messages[0]));
    }

    #[test]
    fn test_audio_tracker_skips_loaded_history() {
        let mut chat = Chat::new("c".to_string());
        let mut old = Message::assistant("old").with_timestamp(1);
        old.audio_data = Some("AAAA".to_string());
        chat.messages.push(old);

        let mut tracker = AudioPlaybackTracker::new();
        tracker.mark_all_played(&chat);
        assert!(tracker.next_unplayed(&chat).is_none());

        let mut fresh = Message::assistant("new").with_timestamp(2);
        fresh.audio_data = Some("BBBB".to_string());
        chat.messages.push(fresh);
        assert_eq!(tracker.next_unplayed(&chat).unwrap().content, "new");
    }

    #[test]
    fn test_decode_audio() {
        assert_eq!(decode_audio("UklGRg==").unwrap(), b"RIFF".to_vec());
        assert!(decode_audio("***").is_err());
    }
}
