pub mod message;
pub mod chat;
pub mod event;
pub mod tool;
pub mod provider;
pub mod config;
pub mod error;


pub use error::OmniError;
pub type Result<T> = std::result::Result<T, OmniError>;

/// Milliseconds since the Unix epoch, the unit used for every persisted timestamp.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
