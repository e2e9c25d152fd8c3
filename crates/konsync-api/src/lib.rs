//! Shared Kong entity types for konsync
//!
//! This crate defines the typed records exchanged between source managers
//! (Gateway, Konnect) and the sync engine:
//! - `Service`, `Route`, `Consumer`, `Plugin`, `Upstream`, `Target`
//! - `KongEntity`: identity key + field enumeration per kind
//! - `FieldMap`: the ordered attribute view used for drift and diffing

pub mod entity;
pub mod models;

pub use entity::{
    is_server_field, strip_server_fields, to_field_map, EntityKind, FieldMap, IdentityError,
    KongEntity, SERVER_FIELDS,
};
pub use models::{
    Consumer, Credential, CredentialKind, EntityRef, Plugin, Route, Service, Target, Timestamp,
    Upstream,
};
