//! Entity identity and field enumeration.
//!
//! Kong records are compared field by field across two control planes. Rather
//! than probing attributes at runtime, every entity kind implements
//! [`KongEntity`], which exposes:
//! - a closed [`EntityKind`] tag
//! - a kind-specific identity key (name, username, target, plugin composite)
//! - an ordered [`FieldMap`] view used by drift detection and diffing

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Ordered attribute view of an entity. Top-level JSON nulls are never present.
pub type FieldMap = BTreeMap<String, Value>;

/// Fields assigned by the server that never count as drift.
pub const SERVER_FIELDS: [&str; 3] = ["id", "created_at", "updated_at"];

/// Returns true when `field` is assigned by the control plane.
pub fn is_server_field(field: &str) -> bool {
    SERVER_FIELDS.contains(&field)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("{kind} entity has neither `{field}` nor `id`")]
    Missing { kind: EntityKind, field: &'static str },

    #[error("{kind} entity references a {scope} without id or name")]
    UnresolvedScope {
        kind: EntityKind,
        scope: &'static str,
    },
}

/// The closed set of Kong entity kinds handled by the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Service,
    Route,
    Consumer,
    Plugin,
    Upstream,
    Target,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Service,
        EntityKind::Route,
        EntityKind::Consumer,
        EntityKind::Plugin,
        EntityKind::Upstream,
        EntityKind::Target,
    ];

    /// Collection name as used by the Admin API (`services`, `routes`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Service => "services",
            EntityKind::Route => "routes",
            EntityKind::Consumer => "consumers",
            EntityKind::Plugin => "plugins",
            EntityKind::Upstream => "upstreams",
            EntityKind::Target => "targets",
        }
    }

    /// Attributes that identify an entity of this kind across sources.
    /// Plugins are named by type and optionally by `instance_name`.
    pub fn identity_fields(&self) -> &'static [&'static str] {
        match self {
            EntityKind::Service | EntityKind::Route | EntityKind::Upstream => &["name"],
            EntityKind::Consumer => &["username"],
            EntityKind::Target => &["target"],
            EntityKind::Plugin => &["name", "instance_name"],
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "service" | "services" => Ok(EntityKind::Service),
            "route" | "routes" => Ok(EntityKind::Route),
            "consumer" | "consumers" => Ok(EntityKind::Consumer),
            "plugin" | "plugins" => Ok(EntityKind::Plugin),
            "upstream" | "upstreams" => Ok(EntityKind::Upstream),
            "target" | "targets" => Ok(EntityKind::Target),
            other => Err(format!("unknown entity kind: {}", other)),
        }
    }
}

/// A typed Kong record that can be keyed and compared across sources.
pub trait KongEntity:
    Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static
{
    const KIND: EntityKind;

    /// Source-assigned identifier, differs between Gateway and Konnect.
    fn id(&self) -> Option<&str>;

    /// Stable identity used to pair records from two sources.
    fn identity_key(&self) -> Result<String, IdentityError>;

    /// Ordered view of all attributes with top-level nulls removed.
    fn field_map(&self) -> FieldMap {
        to_field_map(self)
    }

    /// Rebuild a typed record from a (possibly edited) field map.
    fn from_field_map(fields: FieldMap) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(fields.into_iter().collect()))
    }

    /// Same record carrying `id`.
    fn with_id(self, id: &str) -> Self {
        let mut fields = self.field_map();
        fields.insert("id".to_string(), Value::String(id.to_string()));
        Self::from_field_map(fields).unwrap_or(self)
    }

    /// Copy without `created_at`/`updated_at`, suitable for declarative export.
    fn without_timestamps(&self) -> Result<Self, serde_json::Error> {
        let mut fields = self.field_map();
        fields.remove("created_at");
        fields.remove("updated_at");
        Self::from_field_map(fields)
    }
}

/// Serialize any record into a [`FieldMap`], dropping top-level nulls.
pub fn to_field_map<T: Serialize + ?Sized>(value: &T) -> FieldMap {
    match serde_json::to_value(value) {
        Ok(Value::Object(obj)) => obj.into_iter().filter(|(_, v)| !v.is_null()).collect(),
        _ => FieldMap::new(),
    }
}

/// Remove server-assigned fields from a field map.
pub fn strip_server_fields(mut fields: FieldMap) -> FieldMap {
    for field in SERVER_FIELDS {
        fields.remove(field);
    }
    fields
}
