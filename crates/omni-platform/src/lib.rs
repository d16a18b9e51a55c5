//! Platform adapters for omni-core.
//!
//! - `storage`: memory (all targets), file (native), localStorage (wasm32)
//! - `wire`: JSON shapes of the inference server, target independent
//! - `http`: fetch-based backend client (wasm32)

pub mod storage;
pub mod wire;

#[cfg(target_arch = "wasm32")]
pub mod http;
