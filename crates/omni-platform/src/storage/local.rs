//! `window.localStorage` backend.
//! Persistent across page reloads and shared by every tab of the origin.
//!
//! The browser fires a `storage` event in the *other* tabs when a key
//! changes; that event is forwarded onto the change bus. Writes made
//! through this handle are published directly since the browser does not
//! echo them back.

use async_trait::async_trait;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Storage, StorageEvent, Window};

use omni_core::event_bus::{EventBus, Subscription};
use omni_core::ports::StoragePort;
use omni_types::{OmniError, Result, event::StorageChange};

pub struct LocalStorage {
    window: Window,
    storage: Storage,
    changes: EventBus<StorageChange>,
    listener: Closure<dyn FnMut(StorageEvent)>,
}

impl LocalStorage {
    pub fn open() -> Result<Self> {
        let window = web_sys::window()
            .ok_or_else(|| OmniError::Storage("No window object".to_string()))?;
        let storage = window
            .local_storage()
            .map_err(|e| OmniError::Storage(format!("{:?}", e)))?
            .ok_or_else(|| OmniError::Storage("localStorage not available".to_string()))?;

        let changes = EventBus::new();
        let bus = changes.clone();
        let listener = Closure::<dyn FnMut(StorageEvent)>::new(move |event: StorageEvent| {
            // A null key means another tab called clear().
            let change = match event.key() {
                Some(key) => StorageChange::new(key),
                None => StorageChange::cleared(),
            };
            bus.emit(change);
        });
        window
            .add_event_listener_with_callback("storage", listener.as_ref().unchecked_ref())
            .map_err(|e| OmniError::JsInterop(format!("{:?}", e)))?;

        Ok(Self {
            window,
            storage,
            changes,
            listener,
        })
    }
}

impl Drop for LocalStorage {
    fn drop(&mut self) {
        let _ = self
            .window
            .remove_event_listener_with_callback("storage", self.listener.as_ref().unchecked_ref());
    }
}

#[async_trait(?Send)]
impl StoragePort for LocalStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let value = self
            .storage
            .get_item(key)
            .map_err(|e| OmniError::Storage(format!("{:?}", e)))?;
        Ok(value.map(String::into_bytes))
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let text = std::str::from_utf8(value)
            .map_err(|_| OmniError::Storage(format!("value for '{}' is not UTF-8 text", key)))?;
        // Fails with QuotaExceededError when the origin is full.
        self.storage
            .set_item(key, text)
            .map_err(|e| OmniError::Storage(format!("{:?}", e)))?;
        self.changes.emit(StorageChange::new(key));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.storage
            .remove_item(key)
            .map_err(|e| OmniError::Storage(format!("{:?}", e)))?;
        self.changes.emit(StorageChange::new(key));
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let len = self
            .storage
            .length()
            .map_err(|e| OmniError::Storage(format!("{:?}", e)))?;
        let mut keys = Vec::new();
        for index in 0..len {
            if let Ok(Some(key)) = self.storage.key(index) {
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }

    fn subscribe_changes(&self) -> Subscription<StorageChange> {
        self.changes.subscribe()
    }

    fn backend_name(&self) -> &str {
        "localStorage"
    }
}
