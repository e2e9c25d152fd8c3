//! Source manager traits for konsync
//!
//! This crate provides the boundary between the sync engine and the control
//! planes it reconciles:
//! - `EntityManager<T>`: paginated list, scoped list and CRUD for one entity kind
//! - `CredentialManager`, `DeclarativeEndpoint`: consumer credentials and DB-less config
//! - `ControlPlane`: one manager per kind, bundled for a Gateway or Konnect
//! - `memory`: an in-memory control plane for offline use and tests

pub mod error;
pub mod memory;
pub mod plane;
pub mod traits;

pub use error::{Result, SourceError};
pub use memory::{InMemoryControlPlane, InMemoryCredentials, InMemoryManager};
pub use plane::{ControlPlane, ManagedEntity};
pub use traits::{
    CredentialManager, DeclarativeEndpoint, EntityManager, ListQuery, Page, Scope, ScopedEntity,
};
