//! Admin API resource paths per entity kind.

use konsync_api::{Consumer, Plugin, Route, Service, Target, Upstream};
use konsync_core::{ManagedEntity, Scope};

/// An entity kind addressable through the Admin API.
pub trait AdminResource: ManagedEntity {
    /// Collection segment, e.g. `services`.
    const COLLECTION: &'static str;

    /// Kinds that only exist below a parent (`/upstreams/{id}/targets`).
    const NESTED_ONLY: bool = false;

    /// Parent the record must be addressed through, if any.
    fn parent(&self) -> Option<Scope> {
        None
    }
}

impl AdminResource for Service {
    const COLLECTION: &'static str = "services";
}

impl AdminResource for Route {
    const COLLECTION: &'static str = "routes";
}

impl AdminResource for Consumer {
    const COLLECTION: &'static str = "consumers";
}

impl AdminResource for Plugin {
    const COLLECTION: &'static str = "plugins";
}

impl AdminResource for Upstream {
    const COLLECTION: &'static str = "upstreams";
}

impl AdminResource for Target {
    const COLLECTION: &'static str = "targets";
    const NESTED_ONLY: bool = true;

    fn parent(&self) -> Option<Scope> {
        self.upstream
            .as_ref()
            .and_then(|u| u.key())
            .map(|key| Scope::Upstream(key.to_string()))
    }
}

/// `/{parent}/{key}/{collection}`
pub fn scoped_path<T: AdminResource>(scope: &Scope) -> String {
    format!("{}/{}/{}", scope.collection(), scope.key(), T::COLLECTION)
}

/// Collection a new record is posted to.
pub fn create_path<T: AdminResource>(entity: &T) -> String {
    match entity.parent() {
        Some(parent) => scoped_path::<T>(&parent),
        None => T::COLLECTION.to_string(),
    }
}

/// Path of a single record, nested below `parent` when given.
pub fn item_path<T: AdminResource>(parent: Option<&Scope>, key: &str) -> String {
    match parent {
        Some(parent) => format!("{}/{}", scoped_path::<T>(parent), key),
        None => format!("{}/{}", T::COLLECTION, key),
    }
}
