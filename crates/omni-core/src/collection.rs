//! A JSON array persisted under one storage key.
//!
//! Reads never fail: a missing key, an unavailable backend or corrupt JSON
//! all degrade to an empty collection and a log line. Writes report errors.

use std::marker::PhantomData;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use omni_types::Result;

use crate::ports::StoragePort;

pub struct JsonCollection<T> {
    storage: Rc<dyn StoragePort>,
    key: &'static str,
    _item: PhantomData<T>,
}

impl<T: Serialize + DeserializeOwned> JsonCollection<T> {
    pub fn new(storage: Rc<dyn StoragePort>, key: &'static str) -> Self {
        Self {
            storage,
            key,
            _item: PhantomData,
        }
    }

    pub fn key(&self) -> &'static str {
        self.key
    }

    pub fn storage(&self) -> &Rc<dyn StoragePort> {
        &self.storage
    }

    /// Always re-read from the store; nothing is cached here.
    pub async fn load(&self) -> Vec<T> {
        let bytes = match self.storage.get(self.key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Vec::new(),
            Err(e) => {
                log::warn!("Failed to read '{}' from {}: {}", self.key, self.storage.backend_name(), e);
                return Vec::new();
            }
        };
        match serde_json::from_slice::<Vec<T>>(&bytes) {
            Ok(items) => items,
            Err(e) => {
                log::warn!("Discarding unreadable '{}' collection: {}", self.key, e);
                Vec::new()
            }
        }
    }

    pub async fn store(&self, items: &[T]) -> Result<()> {
        let json = serde_json::to_vec(items)?;
        self.storage.set(self.key, &json).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.storage.delete(self.key).await
    }
}
