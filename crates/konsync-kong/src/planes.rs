//! Control planes built from settings.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::client::{AdminClient, AuthStyle};
use crate::endpoints::{HttpCredentialManager, HttpDeclarativeEndpoint};
use crate::manager::HttpEntityManager;
use konsync::settings::Settings;
use konsync::UnifiedQueryService;
use konsync_api::{Consumer, Plugin, Route, Service, Target, Upstream};
use konsync_core::ControlPlane;

/// Admin API root of one Konnect control plane.
pub fn konnect_base_url(url: &str, control_plane: &str) -> String {
    format!(
        "{}/v2/control-planes/{}/core-entities",
        url.trim_end_matches('/'),
        control_plane
    )
}

fn plane(label: &str, client: Arc<AdminClient>) -> ControlPlane {
    ControlPlane {
        label: label.to_string(),
        services: Arc::new(HttpEntityManager::<Service>::new(client.clone())),
        routes: Arc::new(HttpEntityManager::<Route>::new(client.clone())),
        consumers: Arc::new(HttpEntityManager::<Consumer>::new(client.clone())),
        plugins: Arc::new(HttpEntityManager::<Plugin>::new(client.clone())),
        upstreams: Arc::new(HttpEntityManager::<Upstream>::new(client.clone())),
        targets: Arc::new(HttpEntityManager::<Target>::new(client.clone())),
        credentials: Some(Arc::new(HttpCredentialManager::new(client))),
        declarative: None,
    }
}

/// The self-hosted Gateway, including its DB-less `/config` endpoint.
pub fn gateway_plane(settings: &Settings) -> Result<ControlPlane> {
    let client = AdminClient::new(
        &settings.gateway.url,
        settings.gateway.token.as_deref(),
        AuthStyle::AdminToken,
        Duration::from_secs(settings.http.timeout_secs),
        settings.http.page_size,
    )
    .with_context(|| format!("Failed to create Gateway client for {}", settings.gateway.url))?;
    let client = Arc::new(client);

    info!("[planes] Gateway at {}", client.base_url());
    Ok(plane("Gateway", client.clone())
        .with_declarative(Arc::new(HttpDeclarativeEndpoint::new(client))))
}

/// The configured Konnect control plane, `None` when Konnect is not set up.
pub fn konnect_plane(settings: &Settings) -> Result<Option<ControlPlane>> {
    let Some(konnect) = settings.konnect.as_ref().filter(|_| settings.konnect_configured()) else {
        return Ok(None);
    };
    let base_url = konnect_base_url(&konnect.url, &konnect.control_plane);
    let client = AdminClient::new(
        &base_url,
        konnect.token.as_deref(),
        AuthStyle::Bearer,
        Duration::from_secs(settings.http.timeout_secs),
        settings.http.page_size,
    )
    .with_context(|| format!("Failed to create Konnect client for {}", base_url))?;

    info!("[planes] Konnect control plane {}", konnect.control_plane);
    Ok(Some(plane("Konnect", Arc::new(client))))
}

/// Query service over the planes described by `settings`.
pub fn query_service(settings: &Settings) -> Result<UnifiedQueryService> {
    Ok(UnifiedQueryService::new(
        gateway_plane(settings)?,
        konnect_plane(settings)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use konsync::settings::KonnectSettings;

    #[test]
    fn test_konnect_base_url() {
        assert_eq!(
            konnect_base_url("https://eu.api.konghq.com/", "cp-1"),
            "https://eu.api.konghq.com/v2/control-planes/cp-1/core-entities"
        );
    }

    #[test]
    fn test_planes_follow_settings() {
        let mut settings = Settings::default();
        let gateway = gateway_plane(&settings).unwrap();
        assert_eq!(gateway.label, "Gateway");
        assert!(gateway.declarative.is_some());
        assert!(konnect_plane(&settings).unwrap().is_none());

        settings.konnect = Some(KonnectSettings {
            control_plane: "cp-1".into(),
            token: Some("kpat_x".into()),
            ..Default::default()
        });
        let konnect = konnect_plane(&settings).unwrap().unwrap();
        assert_eq!(konnect.label, "Konnect");
        assert!(konnect.declarative.is_none());
        assert!(konnect.credentials.is_some());
        assert!(query_service(&settings).unwrap().konnect_configured());
    }
}
