use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::error::{Result, SyncError};
use konsync_api::{
    Consumer, Credential, CredentialKind, EntityRef, KongEntity, Plugin, Route, Service, Target,
    Upstream,
};

pub const DEFAULT_FORMAT_VERSION: &str = "3.0";

fn default_format_version() -> String {
    DEFAULT_FORMAT_VERSION.to_string()
}

/// A consumer with its credentials embedded under their Kong collection names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsumerEntry {
    #[serde(flatten)]
    pub consumer: Consumer,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keyauth_credentials: Vec<Credential>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub basicauth_credentials: Vec<Credential>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hmacauth_credentials: Vec<Credential>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jwt_secrets: Vec<Credential>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acls: Vec<Credential>,
}

impl ConsumerEntry {
    pub fn new(consumer: Consumer) -> Self {
        Self {
            consumer,
            ..Default::default()
        }
    }

    pub fn credentials(&self, kind: CredentialKind) -> &[Credential] {
        match kind {
            CredentialKind::KeyAuth => &self.keyauth_credentials,
            CredentialKind::BasicAuth => &self.basicauth_credentials,
            CredentialKind::HmacAuth => &self.hmacauth_credentials,
            CredentialKind::Jwt => &self.jwt_secrets,
            CredentialKind::Acl => &self.acls,
        }
    }

    pub fn credentials_mut(&mut self, kind: CredentialKind) -> &mut Vec<Credential> {
        match kind {
            CredentialKind::KeyAuth => &mut self.keyauth_credentials,
            CredentialKind::BasicAuth => &mut self.basicauth_credentials,
            CredentialKind::HmacAuth => &mut self.hmacauth_credentials,
            CredentialKind::Jwt => &mut self.jwt_secrets,
            CredentialKind::Acl => &mut self.acls,
        }
    }
}

/// An upstream with its targets embedded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamEntry {
    #[serde(flatten)]
    pub upstream: Upstream,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<Target>,
}

impl UpstreamEntry {
    pub fn new(upstream: Upstream) -> Self {
        Self {
            upstream,
            targets: Vec::new(),
        }
    }
}

/// Snapshot of one control plane's configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclarativeConfig {
    #[serde(rename = "_format_version", default = "default_format_version")]
    pub format_version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<Service>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consumers: Vec<ConsumerEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<Plugin>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upstreams: Vec<UpstreamEntry>,
}

impl Default for DeclarativeConfig {
    fn default() -> Self {
        Self {
            format_version: default_format_version(),
            services: Vec::new(),
            routes: Vec::new(),
            consumers: Vec::new(),
            plugins: Vec::new(),
            upstreams: Vec::new(),
        }
    }
}

impl DeclarativeConfig {
    /// Read a config file; `.json` is parsed as JSON, anything else as YAML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| SyncError::ConfigFile(format!("{}: {}", path.display(), e)))?;

        let config = if is_json(path) {
            serde_json::from_str(&content)
                .map_err(|e| SyncError::ConfigFile(format!("{}: {}", path.display(), e)))?
        } else {
            serde_yaml::from_str(&content)
                .map_err(|e| SyncError::ConfigFile(format!("{}: {}", path.display(), e)))?
        };
        Ok(config)
    }

    /// Write the config, as JSON for `.json` paths and YAML otherwise.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_json(path) {
            serde_json::to_string_pretty(self)?
        } else {
            serde_yaml::to_string(self)
                .map_err(|e| SyncError::ConfigFile(format!("{}: {}", path.display(), e)))?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigFile(format!("{}: {}", parent.display(), e)))?;
        }
        fs::write(path, content)
            .map_err(|e| SyncError::ConfigFile(format!("{}: {}", path.display(), e)))?;
        info!("[DeclarativeConfig] Saved {} entities to {}", self.entity_count(), path.display());
        Ok(())
    }

    pub fn entity_count(&self) -> usize {
        self.services.len()
            + self.routes.len()
            + self.consumers.len()
            + self.plugins.len()
            + self.upstreams.len()
            + self.upstreams.iter().map(|u| u.targets.len()).sum::<usize>()
    }

    /// Every embedded target with its upstream reference set to the parent.
    pub fn targets(&self) -> Vec<Target> {
        self.upstreams
            .iter()
            .flat_map(|entry| {
                let parent = entry
                    .upstream
                    .identity_key()
                    .ok()
                    .map(EntityRef::by_name);
                entry.targets.iter().cloned().map(move |mut target| {
                    if target.upstream.is_none() {
                        target.upstream = parent.clone();
                    }
                    target
                })
            })
            .collect()
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}
