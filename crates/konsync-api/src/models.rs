//! Typed Kong entity records.
//!
//! Each struct names the attributes the sync engine reads directly and keeps
//! everything else the Admin API returns in a flattened `extra` map, so field
//! comparison always covers the complete record.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::entity::{EntityKind, IdentityError, KongEntity};

/// Kong timestamps are integer seconds for most entities and fractional for
/// targets; keep the number exactly as received.
pub type Timestamp = serde_json::Number;

/// Foreign-key reference (`{"id": ...}` or `{"name": ...}`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl EntityRef {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: None,
        }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: Some(name.into()),
        }
    }

    /// The id when known, else the name.
    pub fn key(&self) -> Option<&str> {
        self.id.as_deref().or(self.name.as_deref())
    }

    /// True when `value` equals either the referenced id or name.
    pub fn matches(&self, value: &str) -> bool {
        self.id.as_deref() == Some(value) || self.name.as_deref() == Some(value)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key().unwrap_or("<empty>"))
    }
}

fn name_or_id(
    kind: EntityKind,
    field: &'static str,
    name: Option<&str>,
    id: Option<&str>,
) -> Result<String, IdentityError> {
    name.or(id)
        .map(str::to_string)
        .ok_or(IdentityError::Missing { kind, field })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Service {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Service {
    pub fn new(name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            host: Some(host.into()),
            ..Default::default()
        }
    }
}

impl KongEntity for Service {
    const KIND: EntityKind = EntityKind::Service;

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn identity_key(&self) -> Result<String, IdentityError> {
        name_or_id(Self::KIND, "name", self.name.as_deref(), self.id.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Route {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocols: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub methods: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hosts: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paths: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strip_path: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<EntityRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Route {
    pub fn new(name: impl Into<String>, service: EntityRef) -> Self {
        Self {
            name: Some(name.into()),
            service: Some(service),
            ..Default::default()
        }
    }
}

impl KongEntity for Route {
    const KIND: EntityKind = EntityKind::Route;

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn identity_key(&self) -> Result<String, IdentityError> {
        name_or_id(Self::KIND, "name", self.name.as_deref(), self.id.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Consumer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Consumer {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            ..Default::default()
        }
    }
}

impl KongEntity for Consumer {
    const KIND: EntityKind = EntityKind::Consumer;

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn identity_key(&self) -> Result<String, IdentityError> {
        name_or_id(
            Self::KIND,
            "username",
            self.username.as_deref(),
            self.id.as_deref(),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plugin {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Plugin type, e.g. `rate-limiting`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<EntityRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<EntityRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer: Option<EntityRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Plugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// True when the plugin is attached to no service, route or consumer.
    pub fn is_global(&self) -> bool {
        self.service.is_none() && self.route.is_none() && self.consumer.is_none()
    }

    /// `name|svc:<ref>|rt:<ref>|con:<ref>` over whichever scopes are set.
    pub fn composite_key(&self) -> Result<Option<String>, IdentityError> {
        let Some(name) = self.name.as_deref() else {
            return Ok(None);
        };

        let mut key = name.to_string();
        let scopes = [
            ("svc", "service", &self.service),
            ("rt", "route", &self.route),
            ("con", "consumer", &self.consumer),
        ];
        for (prefix, scope, reference) in scopes {
            if let Some(reference) = reference {
                let value = reference.key().ok_or(IdentityError::UnresolvedScope {
                    kind: EntityKind::Plugin,
                    scope,
                })?;
                key.push_str(&format!("|{}:{}", prefix, value));
            }
        }
        Ok(Some(key))
    }
}

impl KongEntity for Plugin {
    const KIND: EntityKind = EntityKind::Plugin;

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn identity_key(&self) -> Result<String, IdentityError> {
        if let Some(instance_name) = &self.instance_name {
            return Ok(instance_name.clone());
        }
        if let Some(composite) = self.composite_key()? {
            return Ok(composite);
        }
        name_or_id(Self::KIND, "instance_name", None, self.id.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Upstream {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slots: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Upstream {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

impl KongEntity for Upstream {
    const KIND: EntityKind = EntityKind::Upstream;

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn identity_key(&self) -> Result<String, IdentityError> {
        name_or_id(Self::KIND, "name", self.name.as_deref(), self.id.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Target {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// `host:port` address of the upstream member.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<EntityRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Target {
    pub fn new(target: impl Into<String>, upstream: EntityRef) -> Self {
        Self {
            target: Some(target.into()),
            upstream: Some(upstream),
            ..Default::default()
        }
    }
}

impl KongEntity for Target {
    const KIND: EntityKind = EntityKind::Target;

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn identity_key(&self) -> Result<String, IdentityError> {
        name_or_id(
            Self::KIND,
            "target",
            self.target.as_deref(),
            self.id.as_deref(),
        )
    }
}

/// Consumer credential sub-types exported alongside consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CredentialKind {
    #[serde(rename = "keyauth_credentials")]
    KeyAuth,
    #[serde(rename = "basicauth_credentials")]
    BasicAuth,
    #[serde(rename = "hmacauth_credentials")]
    HmacAuth,
    #[serde(rename = "jwt_secrets")]
    Jwt,
    #[serde(rename = "acls")]
    Acl,
}

impl CredentialKind {
    pub const ALL: [CredentialKind; 5] = [
        CredentialKind::KeyAuth,
        CredentialKind::BasicAuth,
        CredentialKind::HmacAuth,
        CredentialKind::Jwt,
        CredentialKind::Acl,
    ];

    /// Path segment below `/consumers/{consumer}/`.
    pub fn path_segment(&self) -> &'static str {
        match self {
            CredentialKind::KeyAuth => "key-auth",
            CredentialKind::BasicAuth => "basic-auth",
            CredentialKind::HmacAuth => "hmac-auth",
            CredentialKind::Jwt => "jwt",
            CredentialKind::Acl => "acls",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer: Option<EntityRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_service_keeps_unknown_fields() {
        let svc: Service = serde_json::from_value(json!({
            "id": "a1",
            "name": "api",
            "host": "old.local",
            "read_timeout": 60000,
            "client_certificate": null
        }))
        .unwrap();

        assert_eq!(svc.extra["read_timeout"], json!(60000));
        let fields = svc.field_map();
        assert_eq!(fields["read_timeout"], json!(60000));
        assert!(!fields.contains_key("client_certificate"));
    }

    #[test]
    fn test_identity_falls_back_to_id() {
        let svc = Service {
            id: Some("a1".into()),
            ..Default::default()
        };
        assert_eq!(svc.identity_key().unwrap(), "a1");

        let missing = Consumer::default();
        assert_eq!(
            missing.identity_key(),
            Err(IdentityError::Missing {
                kind: EntityKind::Consumer,
                field: "username"
            })
        );
    }

    #[test]
    fn test_plugin_identity_prefers_instance_name() {
        let mut plugin = Plugin::new("rate-limiting");
        plugin.instance_name = Some("rl-public".into());
        plugin.service = Some(EntityRef::by_id("svc-1"));
        assert_eq!(plugin.identity_key().unwrap(), "rl-public");
    }

    #[test]
    fn test_plugin_composite_key_covers_all_scopes() {
        let mut plugin = Plugin::new("rate-limiting");
        plugin.service = Some(EntityRef::by_id("svc-1"));
        plugin.route = Some(EntityRef::by_id("rt-1"));
        plugin.consumer = Some(EntityRef::by_name("alice"));
        assert_eq!(
            plugin.identity_key().unwrap(),
            "rate-limiting|svc:svc-1|rt:rt-1|con:alice"
        );
    }

    #[test]
    fn test_plugins_on_different_routes_never_collide() {
        let mut a = Plugin::new("cors");
        a.route = Some(EntityRef::by_id("rt-1"));
        let mut b = Plugin::new("cors");
        b.route = Some(EntityRef::by_id("rt-2"));
        assert_ne!(a.identity_key().unwrap(), b.identity_key().unwrap());
    }

    #[test]
    fn test_plugin_scope_without_id_or_name_fails() {
        let mut plugin = Plugin::new("cors");
        plugin.route = Some(EntityRef::default());
        assert_eq!(
            plugin.identity_key(),
            Err(IdentityError::UnresolvedScope {
                kind: EntityKind::Plugin,
                scope: "route"
            })
        );
    }

    #[test]
    fn test_without_timestamps_keeps_id() {
        let target: Target = serde_json::from_value(json!({
            "id": "t1",
            "target": "10.0.0.1:80",
            "created_at": 1422386534.123,
            "upstream": {"id": "u1"}
        }))
        .unwrap();
        let stripped = target.without_timestamps().unwrap();
        assert_eq!(stripped.id.as_deref(), Some("t1"));
        assert!(stripped.created_at.is_none());
    }
}
