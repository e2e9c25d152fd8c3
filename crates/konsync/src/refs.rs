//! Carrying parent references from one control plane to the other
//!
//! Gateway and Konnect assign their own ids, so a `{"id": ...}` reference
//! read from the source plane means nothing on the target. Each reference is
//! turned into the parent's identity key on the source plane and then into
//! the id the target plane knows that parent by.

use std::collections::HashMap;
use tracing::debug;

use crate::error::{Result, SyncError};
use konsync_api::{EntityKind, EntityRef, KongEntity};
use konsync_core::{ControlPlane, ManagedEntity};

/// Rewrites the references of entities read from `source` so they can be
/// written to `target`.
///
/// Lookups are cached per kind and key for the lifetime of the translator;
/// parents missing on the target are never cached so a later create is seen.
pub struct RefTranslator<'a> {
    source: &'a ControlPlane,
    target: &'a ControlPlane,
    /// With `lenient`, a parent missing on the target becomes a name
    /// reference instead of an error.
    lenient: bool,
    names: HashMap<(EntityKind, String), String>,
    ids: HashMap<(EntityKind, String), String>,
}

impl<'a> RefTranslator<'a> {
    pub fn new(source: &'a ControlPlane, target: &'a ControlPlane) -> Self {
        Self {
            source,
            target,
            lenient: false,
            names: HashMap::new(),
            ids: HashMap::new(),
        }
    }

    /// Dry runs use this: parents that would be created earlier in the same
    /// run do not exist on the target yet.
    pub fn lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }

    /// `entity` with every reference pointing at the target plane's id.
    pub async fn translate<T: ManagedEntity>(&mut self, mut entity: T) -> Result<T> {
        let mut refs = Vec::new();
        entity.visit_refs(&mut |kind, reference| refs.push((kind, reference.clone())));
        if refs.is_empty() {
            return Ok(entity);
        }

        let mut translated = Vec::with_capacity(refs.len());
        for (kind, reference) in &refs {
            translated.push(self.translate_ref(*kind, reference).await?);
        }

        let mut translated = translated.into_iter();
        entity.visit_refs(&mut |_, reference| {
            if let Some(next) = translated.next() {
                *reference = next;
            }
        });
        Ok(entity)
    }

    async fn translate_ref(&mut self, kind: EntityKind, reference: &EntityRef) -> Result<EntityRef> {
        let name = match (&reference.name, &reference.id) {
            (Some(name), _) => name.clone(),
            (None, Some(id)) => match self.source_name(kind, id).await? {
                Some(name) => name,
                None => return self.known_on_target(kind, id).await,
            },
            (None, None) => return Ok(reference.clone()),
        };
        match self.target_id(kind, &name).await? {
            Some(id) => Ok(EntityRef::by_id(id)),
            None if self.lenient => Ok(EntityRef::by_name(name)),
            None => Err(SyncError::MissingReference {
                kind,
                reference: name,
                plane: self.target.label.clone(),
            }),
        }
    }

    async fn source_name(&mut self, kind: EntityKind, id: &str) -> Result<Option<String>> {
        let cache_key = (kind, id.to_string());
        if let Some(name) = self.names.get(&cache_key) {
            return Ok(Some(name.clone()));
        }
        let Some((_, name)) = lookup(self.source, kind, id).await? else {
            return Ok(None);
        };
        debug!(
            "[RefTranslator] {} {} on {} is '{}'",
            kind, id, self.source.label, name
        );
        self.names.insert(cache_key, name.clone());
        Ok(Some(name))
    }

    /// Merged states start from the target record, so an id unknown to the
    /// source may already be the target's own.
    async fn known_on_target(&mut self, kind: EntityKind, id: &str) -> Result<EntityRef> {
        match lookup(self.target, kind, id).await? {
            Some((Some(target_id), _)) if target_id == id => Ok(EntityRef::by_id(target_id)),
            _ => Err(SyncError::MissingReference {
                kind,
                reference: id.to_string(),
                plane: self.source.label.clone(),
            }),
        }
    }

    async fn target_id(&mut self, kind: EntityKind, name: &str) -> Result<Option<String>> {
        let cache_key = (kind, name.to_string());
        if let Some(id) = self.ids.get(&cache_key) {
            return Ok(Some(id.clone()));
        }
        let Some((id, _)) = lookup(self.target, kind, name).await? else {
            return Ok(None);
        };
        let id = id.unwrap_or_else(|| name.to_string());
        self.ids.insert(cache_key, id.clone());
        Ok(Some(id))
    }
}

/// Id and identity key of the `kind` entity addressed by `key` on `plane`.
async fn lookup(
    plane: &ControlPlane,
    kind: EntityKind,
    key: &str,
) -> Result<Option<(Option<String>, String)>> {
    match kind {
        EntityKind::Service => located(plane.services.get(key).await?),
        EntityKind::Route => located(plane.routes.get(key).await?),
        EntityKind::Consumer => located(plane.consumers.get(key).await?),
        EntityKind::Upstream => located(plane.upstreams.get(key).await?),
        EntityKind::Plugin | EntityKind::Target => {
            Err(SyncError::NotSupported(format!("references to {}", kind)))
        }
    }
}

fn located<T: KongEntity>(entity: Option<T>) -> Result<Option<(Option<String>, String)>> {
    let Some(entity) = entity else {
        return Ok(None);
    };
    let name = entity.identity_key()?;
    Ok(Some((entity.id().map(str::to_string), name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use konsync_api::{Plugin, Route, Service};
    use konsync_core::InMemoryControlPlane;

    fn service(id: &str, name: &str) -> Service {
        Service {
            id: Some(id.into()),
            ..Service::new(name, "h.local")
        }
    }

    #[tokio::test]
    async fn test_id_reference_becomes_target_id() {
        let gateway = InMemoryControlPlane::new("Gateway").with_services(vec![service("g-svc", "api")]);
        let konnect = InMemoryControlPlane::new("Konnect").with_services(vec![service("k-svc", "api")]);
        let (source, target) = (gateway.plane(), konnect.plane());
        let mut translator = RefTranslator::new(&source, &target);

        let route = translator
            .translate(Route::new("orders", EntityRef::by_id("g-svc")))
            .await
            .unwrap();
        assert_eq!(route.service, Some(EntityRef::by_id("k-svc")));

        let by_name = translator
            .translate(Route::new("users", EntityRef::by_name("api")))
            .await
            .unwrap();
        assert_eq!(by_name.service, Some(EntityRef::by_id("k-svc")));
    }

    #[tokio::test]
    async fn test_every_plugin_scope_is_translated() {
        let gateway = InMemoryControlPlane::new("Gateway")
            .with_services(vec![service("g-svc", "api")])
            .with_routes(vec![Route {
                id: Some("g-rt".into()),
                ..Route::new("orders", EntityRef::by_id("g-svc"))
            }]);
        let konnect = InMemoryControlPlane::new("Konnect")
            .with_services(vec![service("k-svc", "api")])
            .with_routes(vec![Route {
                id: Some("k-rt".into()),
                ..Route::new("orders", EntityRef::by_id("k-svc"))
            }]);
        let (source, target) = (gateway.plane(), konnect.plane());

        let plugin = Plugin {
            service: Some(EntityRef::by_id("g-svc")),
            route: Some(EntityRef::by_id("g-rt")),
            ..Plugin::new("rate-limiting")
        };
        let plugin = RefTranslator::new(&source, &target)
            .translate(plugin)
            .await
            .unwrap();
        assert_eq!(plugin.service, Some(EntityRef::by_id("k-svc")));
        assert_eq!(plugin.route, Some(EntityRef::by_id("k-rt")));
        assert!(plugin.consumer.is_none());
    }

    #[tokio::test]
    async fn test_parent_missing_on_target() {
        let gateway = InMemoryControlPlane::new("Gateway").with_services(vec![service("g-bill", "billing")]);
        let konnect = InMemoryControlPlane::new("Konnect");
        let (source, target) = (gateway.plane(), konnect.plane());
        let route = Route::new("invoices", EntityRef::by_id("g-bill"));

        let err = RefTranslator::new(&source, &target)
            .translate(route.clone())
            .await
            .unwrap_err();
        match err {
            SyncError::MissingReference { kind, reference, plane } => {
                assert_eq!(kind, EntityKind::Service);
                assert_eq!(reference, "billing");
                assert_eq!(plane, "Konnect");
            }
            other => panic!("unexpected error: {other}"),
        }

        let planned = RefTranslator::new(&source, &target)
            .lenient(true)
            .translate(route)
            .await
            .unwrap();
        assert_eq!(planned.service, Some(EntityRef::by_name("billing")));
    }

    #[tokio::test]
    async fn test_reference_unknown_to_source() {
        let gateway = InMemoryControlPlane::new("Gateway");
        let konnect = InMemoryControlPlane::new("Konnect").with_services(vec![service("k-svc", "api")]);
        let (source, target) = (gateway.plane(), konnect.plane());

        let err = RefTranslator::new(&source, &target)
            .translate(Route::new("orders", EntityRef::by_id("gone")))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MissingReference { ref plane, .. } if plane == "Gateway"));

        let kept = RefTranslator::new(&source, &target)
            .translate(Route::new("orders", EntityRef::by_id("k-svc")))
            .await
            .unwrap();
        assert_eq!(kept.service, Some(EntityRef::by_id("k-svc")));
    }
}
