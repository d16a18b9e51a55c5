//! Pick a storage backend from configuration.
//!
//! `Auto` priority: localStorage (browser) or the data directory (native),
//! then memory as the fallback.

use std::rc::Rc;

use omni_core::ports::StoragePort;
use omni_types::{
    OmniError, Result,
    config::{StorageBackendType, StorageConfig},
};

use super::MemoryStorage;

/// Returns a trait object so callers are backend-agnostic.
pub fn open_storage(config: &StorageConfig) -> Result<Rc<dyn StoragePort>> {
    match config.backend {
        StorageBackendType::Memory => {
            log::info!("Storage backend: memory");
            Ok(Rc::new(MemoryStorage::new()))
        }
        StorageBackendType::LocalStorage => open_local(),
        StorageBackendType::File => open_file(config),
        StorageBackendType::Auto => match open_persistent(config) {
            Ok(storage) => Ok(storage),
            Err(e) => {
                log::warn!("Persistent storage unavailable ({}), falling back to memory", e);
                Ok(Rc::new(MemoryStorage::new()))
            }
        },
    }
}

#[cfg(target_arch = "wasm32")]
fn open_persistent(_config: &StorageConfig) -> Result<Rc<dyn StoragePort>> {
    open_local()
}

#[cfg(not(target_arch = "wasm32"))]
fn open_persistent(config: &StorageConfig) -> Result<Rc<dyn StoragePort>> {
    open_file(config)
}

#[cfg(target_arch = "wasm32")]
fn open_local() -> Result<Rc<dyn StoragePort>> {
    let storage = super::LocalStorage::open()?;
    log::info!("Storage backend: localStorage");
    Ok(Rc::new(storage))
}

#[cfg(not(target_arch = "wasm32"))]
fn open_local() -> Result<Rc<dyn StoragePort>> {
    Err(OmniError::Config(
        "localStorage is only available in the browser".to_string(),
    ))
}

#[cfg(not(target_arch = "wasm32"))]
fn open_file(config: &StorageConfig) -> Result<Rc<dyn StoragePort>> {
    let storage = match config.path {
        Some(ref path) => super::FileStorage::open(path)?,
        None => super::FileStorage::open_default()?,
    };
    log::info!("Storage backend: file ({})", storage.dir().display());
    Ok(Rc::new(storage))
}

#[cfg(target_arch = "wasm32")]
fn open_file(_config: &StorageConfig) -> Result<Rc<dyn StoragePort>> {
    Err(OmniError::Config(
        "file storage is not available in the browser".to_string(),
    ))
}
