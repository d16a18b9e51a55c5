//! In-memory storage backend.
//! Fastest option but not persistent across page reloads.
//!
//! Clones share the same map and change bus, so two handles behave like two
//! contexts (tabs) over one medium: a write through either is visible to
//! both and notifies every subscriber.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use async_trait::async_trait;
use omni_core::event_bus::{EventBus, Subscription};
use omni_core::ports::StoragePort;
use omni_types::{Result, event::StorageChange};

#[derive(Clone, Default)]
pub struct MemoryStorage {
    data: Rc<RefCell<HashMap<String, Vec<u8>>>>,
    changes: EventBus<StorageChange>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.borrow().is_empty()
    }
}

#[async_trait(?Send)]
impl StoragePort for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.data.borrow().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.data
            .borrow_mut()
            .insert(key.to_string(), value.to_vec());
        self.changes.emit(StorageChange::new(key));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if self.data.borrow_mut().remove(key).is_some() {
            self.changes.emit(StorageChange::new(key));
        }
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let keys: Vec<String> = self
            .data
            .borrow()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        Ok(keys)
    }

    fn subscribe_changes(&self) -> Subscription<StorageChange> {
        self.changes.subscribe()
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}
