use crate::audit::AuditError;
use konsync_api::{EntityKind, IdentityError};
use konsync_core::SourceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport or API failure from a source manager, passed through as-is.
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("Duplicate {kind} identity '{key}' returned by {origin}")]
    DuplicateIdentity {
        kind: EntityKind,
        key: String,
        origin: String,
    },

    #[error("Manual merge required for {entity_type} '{entity_name}': conflicting fields {fields:?}")]
    ManualMergeRequired {
        entity_type: EntityKind,
        entity_name: String,
        fields: Vec<String>,
    },

    #[error("Invalid merged state for {entity_type} '{entity_name}': {}", errors.join("; "))]
    InvalidMerge {
        entity_type: EntityKind,
        entity_name: String,
        errors: Vec<String>,
    },

    #[error("Referenced {kind} '{reference}' does not exist on {plane}")]
    MissingReference {
        kind: EntityKind,
        reference: String,
        plane: String,
    },

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error("{0} is not supported by this control plane")]
    NotSupported(String),

    #[error("Invalid entity payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Config file error: {0}")]
    ConfigFile(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
