use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OmniError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// The server answered but refused the request.
    #[error("{detail}")]
    Rejected { status: u16, detail: String },

    /// No response was received at all.
    #[error("Server unreachable: {0}")]
    Unreachable(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("A turn is already in progress")]
    Busy,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JS interop error: {0}")]
    JsInterop(String),

    #[error("{0}")]
    Other(String),
}

impl OmniError {
    /// Whether this failure means the backend could not be reached, as
    /// opposed to a reachable backend rejecting the request.
    pub fn indicates_offline(&self) -> bool {
        match self {
            OmniError::Unreachable(_) | OmniError::Timeout(_) => true,
            OmniError::Rejected { .. } | OmniError::Validation(_) | OmniError::Busy => false,
            other => {
                let text = other.to_string().to_lowercase();
                ["connection", "connect", "network", "failed to fetch"]
                    .iter()
                    .any(|needle| text.contains(needle))
            }
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        OmniError::NotFound { entity, id: id.into() }
    }
}

impl From<serde_json::Error> for OmniError {
    fn from(e: serde_json::Error) -> Self {
        OmniError::Serialization(e.to_string())
    }
}
