//! Omni App: composition root and WASM entry point.
//!
//! `Session` assembles storage, backend and the core services on any
//! target. Under wasm32 the `OmniClient` facade hands it to a browser UI.

pub mod session;

#[cfg(target_arch = "wasm32")]
mod web;

#[cfg(target_arch = "wasm32")]
pub use web::OmniClient;


#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

/// WASM entry point: runs when the module is instantiated.
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen(start)]
pub fn main() {
    wasm_logger::init(wasm_logger::Config::default());
    log::info!("Omni client starting...");
}
