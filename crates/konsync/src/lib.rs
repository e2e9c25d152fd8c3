//! Gateway ↔ Konnect reconciliation engine
//!
//! The pieces, bottom-up:
//! - `merge`: key two entity lists by identity and annotate drift
//! - `query`: drain both control planes and build unified, filtered views
//! - `analysis`: classify fields and compute safe auto-merges
//! - `conflict`: hold per-entity resolution decisions
//! - `executor`: apply decisions to the target plane
//! - `refs`: carry parent references across planes with different ids
//! - `audit`: append-only JSON-lines record of every sync step
//! - `declarative`: export, diff and apply single-source config files
//!
//! `settings` and `logging` cover process setup for command handlers.

pub mod analysis;
pub mod audit;
pub mod conflict;
pub mod declarative;
pub mod error;
pub mod executor;
pub mod logging;
pub mod merge;
pub mod query;
pub mod refs;
pub mod settings;
pub mod validation;

pub use analysis::{
    analyze_merge_potential, build_merge_template, compute_auto_merge, validate_merged_state,
    MergeAnalysis,
};
pub use audit::{
    AuditAction, AuditError, AuditStatus, SyncAuditEntry, SyncAuditService, SyncOperation, SyncRun,
    SyncSummary,
};
pub use conflict::{
    build_conflicts, BatchAction, Conflict, ConflictResolutionService, MergedState, Resolution,
    ResolutionAction, SyncDirection,
};
pub use declarative::{ConfigManager, DeclarativeConfig};
pub use error::{Result, SyncError};
pub use executor::{SyncExecutor, SyncReport};
pub use merge::{
    detect_drift, detect_field_drift, merge_entities, EntitySource, UnifiedEntity,
    UnifiedEntityList,
};
pub use query::{KindSummary, PluginFilter, RouteFilter, UnifiedQueryService};
pub use refs::RefTranslator;
pub use settings::Settings;
pub use validation::ValidationResult;
