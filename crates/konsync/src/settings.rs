use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_GATEWAY_URL: &str = "http://localhost:8001";
pub const DEFAULT_KONNECT_URL: &str = "https://us.api.konghq.com";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Connection settings for the self-hosted Gateway Admin API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewaySettings {
    #[serde(default = "default_gateway_url")]
    pub url: String,
    /// Sent as `Kong-Admin-Token` when set
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            token: None,
        }
    }
}

/// Connection settings for one Konnect control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KonnectSettings {
    #[serde(default = "default_konnect_url")]
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
    /// Control plane id
    #[serde(default)]
    pub control_plane: String,
}

impl Default for KonnectSettings {
    fn default() -> Self {
        Self {
            url: default_konnect_url(),
            token: None,
            control_plane: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSettings {
    #[serde(default = "default_audit_log")]
    pub log_path: PathBuf,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            log_path: default_audit_log(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Top-level settings, read from YAML and then overridden by `KONSYNC_*`
/// environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub konnect: Option<KonnectSettings>,
    #[serde(default)]
    pub audit: AuditSettings,
    #[serde(default)]
    pub http: HttpSettings,
}

fn default_gateway_url() -> String {
    DEFAULT_GATEWAY_URL.to_string()
}

fn default_konnect_url() -> String {
    DEFAULT_KONNECT_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_audit_log() -> PathBuf {
    let base = std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    base.join(".konsync").join("audit").join("sync.jsonl")
}

impl Settings {
    /// Load settings from a YAML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        let settings: Settings = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse settings YAML {}", path.display()))?;
        Ok(settings)
    }

    /// File settings (or defaults without a file) with environment overrides applied
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        settings.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(settings)
    }

    /// Apply `KONSYNC_*` overrides from `lookup`. Setting any Konnect
    /// variable enables the Konnect section.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup("KONSYNC_GATEWAY_URL") {
            self.gateway.url = url;
        }
        if let Some(token) = lookup("KONSYNC_GATEWAY_TOKEN") {
            self.gateway.token = Some(token);
        }

        let konnect_url = lookup("KONSYNC_KONNECT_URL");
        let konnect_token = lookup("KONSYNC_KONNECT_TOKEN");
        let control_plane = lookup("KONSYNC_KONNECT_CONTROL_PLANE");
        if konnect_url.is_some() || konnect_token.is_some() || control_plane.is_some() {
            let konnect = self.konnect.get_or_insert_with(KonnectSettings::default);
            if let Some(url) = konnect_url {
                konnect.url = url;
            }
            if let Some(token) = konnect_token {
                konnect.token = Some(token);
            }
            if let Some(control_plane) = control_plane {
                konnect.control_plane = control_plane;
            }
        }

        if let Some(path) = lookup("KONSYNC_AUDIT_LOG") {
            self.audit.log_path = PathBuf::from(path);
        }
        if let Some(timeout) = lookup("KONSYNC_TIMEOUT_SECS") {
            self.http.timeout_secs = timeout
                .parse()
                .with_context(|| format!("KONSYNC_TIMEOUT_SECS is not a number: {}", timeout))?;
        }
        Ok(())
    }

    /// Konnect is usable only with a control plane id.
    pub fn konnect_configured(&self) -> bool {
        self.konnect
            .as_ref()
            .is_some_and(|k| !k.control_plane.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.gateway.url, DEFAULT_GATEWAY_URL);
        assert_eq!(settings.http.timeout_secs, 30);
        assert_eq!(settings.http.page_size, 100);
        assert!(settings.audit.log_path.ends_with(".konsync/audit/sync.jsonl"));
        assert!(!settings.konnect_configured());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("konsync.yaml");
        fs::write(
            &path,
            "gateway:\n  url: http://kong:8001\nkonnect:\n  control_plane: cp-123\n  token: kpat_x\n",
        )
        .unwrap();

        let settings = Settings::load_from_file(&path).unwrap();
        assert_eq!(settings.gateway.url, "http://kong:8001");
        assert!(settings.gateway.token.is_none());
        let konnect = settings.konnect.as_ref().unwrap();
        assert_eq!(konnect.url, DEFAULT_KONNECT_URL);
        assert_eq!(konnect.control_plane, "cp-123");
        assert!(settings.konnect_configured());
    }

    #[test]
    fn test_overrides_win_over_file_values() {
        let env: HashMap<&str, &str> = [
            ("KONSYNC_GATEWAY_URL", "http://override:8001"),
            ("KONSYNC_KONNECT_CONTROL_PLANE", "cp-env"),
            ("KONSYNC_AUDIT_LOG", "/tmp/audit.jsonl"),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings::default();
        settings
            .apply_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(settings.gateway.url, "http://override:8001");
        assert!(settings.konnect_configured());
        assert_eq!(settings.audit.log_path, PathBuf::from("/tmp/audit.jsonl"));
    }

    #[test]
    fn test_invalid_timeout_override_is_an_error() {
        let mut settings = Settings::default();
        let err = settings
            .apply_overrides(|name| (name == "KONSYNC_TIMEOUT_SECS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("KONSYNC_TIMEOUT_SECS"));
    }

    #[test]
    #[serial]
    fn test_load_reads_process_environment() {
        std::env::set_var("KONSYNC_GATEWAY_TOKEN", "secret");
        let settings = Settings::load(None).unwrap();
        std::env::remove_var("KONSYNC_GATEWAY_TOKEN");
        assert_eq!(settings.gateway.token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_missing_file_has_context() {
        let err = Settings::load_from_file(Path::new("/nonexistent/konsync.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read settings file"));
    }
}
