//! A control plane as a bundle of per-kind source managers.

use std::fmt;
use std::sync::Arc;

use crate::traits::{CredentialManager, DeclarativeEndpoint, EntityManager, ScopedEntity};
use konsync_api::{Consumer, KongEntity, Plugin, Route, Service, Target, Upstream};

/// Every source manager for one control plane (a Gateway or a Konnect
/// control plane). Cheap to clone.
#[derive(Clone)]
pub struct ControlPlane {
    /// Display label, e.g. "Gateway" or "Konnect".
    pub label: String,
    pub services: Arc<dyn EntityManager<Service>>,
    pub routes: Arc<dyn EntityManager<Route>>,
    pub consumers: Arc<dyn EntityManager<Consumer>>,
    pub plugins: Arc<dyn EntityManager<Plugin>>,
    pub upstreams: Arc<dyn EntityManager<Upstream>>,
    pub targets: Arc<dyn EntityManager<Target>>,
    pub credentials: Option<Arc<dyn CredentialManager>>,
    pub declarative: Option<Arc<dyn DeclarativeEndpoint>>,
}

impl ControlPlane {
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialManager>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_declarative(mut self, endpoint: Arc<dyn DeclarativeEndpoint>) -> Self {
        self.declarative = Some(endpoint);
        self
    }

    /// The manager responsible for entity kind `T`.
    pub fn manager<T: ManagedEntity>(&self) -> &dyn EntityManager<T> {
        T::manager(self).as_ref()
    }
}

impl fmt::Debug for ControlPlane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlPlane")
            .field("label", &self.label)
            .field("credentials", &self.credentials.is_some())
            .field("declarative", &self.declarative.is_some())
            .finish()
    }
}

/// Entity kinds that have a manager on every [`ControlPlane`].
pub trait ManagedEntity: KongEntity + ScopedEntity {
    fn manager(plane: &ControlPlane) -> &Arc<dyn EntityManager<Self>>;
}

impl ManagedEntity for Service {
    fn manager(plane: &ControlPlane) -> &Arc<dyn EntityManager<Self>> {
        &plane.services
    }
}

impl ManagedEntity for Route {
    fn manager(plane: &ControlPlane) -> &Arc<dyn EntityManager<Self>> {
        &plane.routes
    }
}

impl ManagedEntity for Consumer {
    fn manager(plane: &ControlPlane) -> &Arc<dyn EntityManager<Self>> {
        &plane.consumers
    }
}

impl ManagedEntity for Plugin {
    fn manager(plane: &ControlPlane) -> &Arc<dyn EntityManager<Self>> {
        &plane.plugins
    }
}

impl ManagedEntity for Upstream {
    fn manager(plane: &ControlPlane) -> &Arc<dyn EntityManager<Self>> {
        &plane.upstreams
    }
}

impl ManagedEntity for Target {
    fn manager(plane: &ControlPlane) -> &Arc<dyn EntityManager<Self>> {
        &plane.targets
    }
}
