use konsync_api::EntityKind;
use thiserror::Error;

/// Errors raised by source managers (Gateway, Konnect, in-memory).
///
/// The sync engine never retries; these propagate to the caller unchanged.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Transport error calling {url}: {message}")]
    Transport { url: String, message: String },

    #[error("HTTP {status} error from {url}: {body}")]
    Http {
        status: u16,
        url: String,
        body: String,
    },

    #[error("Failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("{kind} '{key}' not found")]
    NotFound { kind: EntityKind, key: String },

    #[error("{0} is not supported by this control plane")]
    Unsupported(String),

    #[error("Invalid entity payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl SourceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SourceError::NotFound { .. } | SourceError::Http { status: 404, .. })
    }
}

pub type Result<T> = std::result::Result<T, SourceError>;
