//! Single-source declarative configuration
//!
//! Export a control plane to a config snapshot, validate references inside a
//! snapshot, diff it against the live state and apply it either entity by
//! entity or as one replace-all push to a DB-less Gateway.

mod config;
mod manager;

pub use config::{ConsumerEntry, DeclarativeConfig, UpstreamEntry, DEFAULT_FORMAT_VERSION};
pub use manager::{
    ApplyAction, ApplyOperation, ApplyStatus, ConfigDiffSummary, ConfigManager, EntityDiff,
    EntityUpdate, FieldChange,
};
