//! JS-facing client. Each method returns a Promise resolving to a plain JS
//! value (parsed from JSON) or rejecting with an error string.

use std::rc::Rc;

use js_sys::Promise;
use serde::Serialize;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;

use omni_core::orchestrator::TurnInput;
use omni_platform::http::OmniHttpBackend;
use omni_platform::storage::open_storage;
use omni_types::{
    OmniError,
    config::{GenerationOptions, StorageConfig},
    message::MediaPayload,
    provider::TransportConfig,
};

use crate::session::{restore_config, Session};

#[wasm_bindgen]
pub struct OmniClient {
    session: Rc<Session>,
}

#[wasm_bindgen]
impl OmniClient {
    /// Open storage, restore the saved config and connect to the backend.
    pub async fn create() -> Result<OmniClient, JsValue> {
        let bootstrap = open_storage(&StorageConfig::default()).map_err(to_js)?;
        let config = restore_config(bootstrap.as_ref()).await;
        let storage = if config.storage == StorageConfig::default() {
            bootstrap
        } else {
            open_storage(&config.storage).map_err(to_js)?
        };

        let backend = Rc::new(OmniHttpBackend::new(config.backend.clone()));
        let session = Session::assemble(config, storage, backend.clone(), backend).await;
        session.start().await;
        Ok(OmniClient {
            session: Rc::new(session),
        })
    }

    /// Send a turn. Media arguments are `data:` URLs.
    pub fn send(
        &self,
        chat_id: Option<String>,
        text: String,
        image: Option<String>,
        video: Option<String>,
        audio: Option<String>,
        tools_enabled: bool,
    ) -> Promise {
        let session = self.session.clone();
        future_to_promise(async move {
            let mut input = TurnInput::text(text);
            input.image = media(image)?;
            input.video = media(video)?;
            input.audio = media(audio)?;
            let outcome = session.send(chat_id, input, tools_enabled).await.map_err(to_js)?;
            let chat = session.current_chat().await;
            to_value(&serde_json::json!({
                "chatId": outcome.chat_id,
                "appended": outcome.appended,
                "error": outcome.error.map(|e| e.to_string()),
                "chat": chat,
            }))
        })
    }

    #[wasm_bindgen(js_name = isBusy)]
    pub fn is_busy(&self) -> bool {
        self.session.is_busy()
    }

    #[wasm_bindgen(js_name = isOnline)]
    pub fn is_online(&self) -> bool {
        self.session.is_online()
    }

    pub fn probe(&self) -> Promise {
        let session = self.session.clone();
        future_to_promise(async move {
            let online = session.probe().await.map_err(to_js)?;
            Ok(JsValue::from_bool(online))
        })
    }

    #[wasm_bindgen(js_name = drainEvents)]
    pub fn drain_events(&self) -> Result<JsValue, JsValue> {
        to_value(&self.session.drain_turn_events())
    }

    // ─── History ─────────────────────────────────────────────

    pub fn sync(&self) -> Promise {
        let session = self.session.clone();
        future_to_promise(async move {
            let changed = session.sync().await.map_err(to_js)?;
            Ok(JsValue::from_bool(changed))
        })
    }

    pub fn chats(&self, query: Option<String>) -> Result<JsValue, JsValue> {
        to_value(&self.session.chats(query.as_deref().unwrap_or("")))
    }

    #[wasm_bindgen(js_name = currentChatId)]
    pub fn current_chat_id(&self) -> Option<String> {
        self.session.current_chat_id()
    }

    #[wasm_bindgen(js_name = newChat)]
    pub fn new_chat(&self) -> Promise {
        let session = self.session.clone();
        future_to_promise(async move {
            let chat = session.new_chat().await.map_err(to_js)?;
            to_value(&chat)
        })
    }

    #[wasm_bindgen(js_name = openChat)]
    pub fn open_chat(&self, id: String) -> Promise {
        let session = self.session.clone();
        future_to_promise(async move {
            let chat = session.open_chat(&id).await.map_err(to_js)?;
            to_value(&chat)
        })
    }

    #[wasm_bindgen(js_name = deleteChat)]
    pub fn delete_chat(&self, id: String) -> Promise {
        let session = self.session.clone();
        future_to_promise(async move {
            session.delete_chat(&id).await.map_err(to_js)?;
            Ok(JsValue::UNDEFINED)
        })
    }

    #[wasm_bindgen(js_name = clearHistory)]
    pub fn clear_history(&self) -> Promise {
        let session = self.session.clone();
        future_to_promise(async move {
            session.clear_history().await.map_err(to_js)?;
            Ok(JsValue::UNDEFINED)
        })
    }

    /// Base64 audio to auto-play for the current chat, if any is new.
    #[wasm_bindgen(js_name = nextAudio)]
    pub fn next_audio(&self) -> Promise {
        let session = self.session.clone();
        future_to_promise(async move {
            let audio = match session.current_chat().await {
                Some(chat) => session.next_audio(&chat),
                None => None,
            };
            Ok(audio.map(JsValue::from).unwrap_or(JsValue::NULL))
        })
    }

    // ─── Settings ────────────────────────────────────────────

    pub fn config(&self) -> Result<JsValue, JsValue> {
        to_value(&self.session.config())
    }

    /// `generation` is a JSON object `{max_tokens, temperature, top_p, return_audio}`.
    #[wasm_bindgen(js_name = setGeneration)]
    pub fn set_generation(&self, generation: String) -> Promise {
        let session = self.session.clone();
        future_to_promise(async move {
            let generation: GenerationOptions = serde_json::from_str(&generation)
                .map_err(|e| to_js(OmniError::from(e)))?;
            session.set_generation(generation).await.map_err(to_js)?;
            Ok(JsValue::UNDEFINED)
        })
    }

    // ─── Providers and tools ─────────────────────────────────

    pub fn providers(&self) -> Promise {
        let session = self.session.clone();
        future_to_promise(async move { to_value(&session.providers().await) })
    }

    /// `transport` is a JSON object tagged by `kind` (`process` or `http`).
    #[wasm_bindgen(js_name = addProvider)]
    pub fn add_provider(&self, id: String, transport: String) -> Promise {
        let session = self.session.clone();
        future_to_promise(async move {
            let transport: TransportConfig = serde_json::from_str(&transport)
                .map_err(|e| to_js(OmniError::from(e)))?;
            let status = session.add_provider(&id, transport).await.map_err(to_js)?;
            to_value(&status)
        })
    }

    #[wasm_bindgen(js_name = connectProvider)]
    pub fn connect_provider(&self, id: String) -> Promise {
        let session = self.session.clone();
        future_to_promise(async move {
            let status = session.connect_provider(&id).await.map_err(to_js)?;
            to_value(&status)
        })
    }

    #[wasm_bindgen(js_name = disconnectProvider)]
    pub fn disconnect_provider(&self, id: String) -> Promise {
        let session = self.session.clone();
        future_to_promise(async move {
            session.disconnect_provider(&id).await.map_err(to_js)?;
            Ok(JsValue::UNDEFINED)
        })
    }

    #[wasm_bindgen(js_name = removeProvider)]
    pub fn remove_provider(&self, id: String) -> Promise {
        let session = self.session.clone();
        future_to_promise(async move {
            session.remove_provider(&id).await.map_err(to_js)?;
            Ok(JsValue::UNDEFINED)
        })
    }

    #[wasm_bindgen(js_name = providerTools)]
    pub fn provider_tools(&self, id: String) -> Promise {
        let session = self.session.clone();
        future_to_promise(async move {
            let tools = session.provider_tools(&id).await.map_err(to_js)?;
            to_value(&tools)
        })
    }

    #[wasm_bindgen(js_name = refreshTools)]
    pub fn refresh_tools(&self) -> Promise {
        let session = self.session.clone();
        future_to_promise(async move {
            let count = session.refresh_tools().await.map_err(to_js)?;
            Ok(JsValue::from_f64(count as f64))
        })
    }

    pub fn tools(&self) -> Result<JsValue, JsValue> {
        to_value(&self.session.tools())
    }
}

fn media(url: Option<String>) -> Result<Option<MediaPayload>, JsValue> {
    url.filter(|u| !u.is_empty())
        .map(|u| MediaPayload::from_data_url(&u).map_err(to_js))
        .transpose()
}

fn to_value<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    let json = serde_json::to_string(value).map_err(|e| to_js(OmniError::from(e)))?;
    js_sys::JSON::parse(&json)
}

fn to_js(e: OmniError) -> JsValue {
    JsValue::from_str(&e.to_string())
}
