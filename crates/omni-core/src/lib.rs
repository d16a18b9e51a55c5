pub mod ports;
pub mod event_bus;
pub mod collection;
pub mod repository;
pub mod history;
pub mod providers;
pub mod catalog;
pub mod orchestrator;
pub mod audio;

#[cfg(test)]
mod tests;
