//! Unified listing across Gateway and Konnect
//!
//! Each `list_*` call drains the paginated collection on both control planes
//! concurrently and merges the results by identity key. Without a Konnect
//! control plane the Konnect side is simply empty.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::merge::{merge_entities, UnifiedEntityList};
use konsync_api::{Consumer, EntityKind, KongEntity, Plugin, Route, Service, Target, Upstream};
use konsync_core::{ControlPlane, ManagedEntity, Scope, SourceError};

/// Restrict a route listing to one service (id or name).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteFilter {
    pub service: Option<String>,
}

impl RouteFilter {
    fn scopes(&self) -> Vec<Scope> {
        self.service.iter().cloned().map(Scope::Service).collect()
    }
}

/// Restrict a plugin listing to a service, route and/or consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginFilter {
    pub service: Option<String>,
    pub route: Option<String>,
    pub consumer: Option<String>,
}

impl PluginFilter {
    fn scopes(&self) -> Vec<Scope> {
        let mut scopes = Vec::new();
        scopes.extend(self.service.iter().cloned().map(Scope::Service));
        scopes.extend(self.route.iter().cloned().map(Scope::Route));
        scopes.extend(self.consumer.iter().cloned().map(Scope::Consumer));
        scopes
    }
}

/// Per-kind counts for a status overview.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindSummary {
    pub gateway_only: usize,
    pub konnect_only: usize,
    pub synced: usize,
    pub drift: usize,
    pub total: usize,
}

impl KindSummary {
    pub fn of<T: KongEntity>(list: &UnifiedEntityList<T>) -> Self {
        Self {
            gateway_only: list.gateway_only_count(),
            konnect_only: list.konnect_only_count(),
            synced: list.synced_count(),
            drift: list.drift_count(),
            total: list.len(),
        }
    }

    fn absorb(&mut self, other: KindSummary) {
        self.gateway_only += other.gateway_only;
        self.konnect_only += other.konnect_only;
        self.synced += other.synced;
        self.drift += other.drift;
        self.total += other.total;
    }
}

/// A scope filter value plus the id and name of the parent it resolves to.
struct ScopeMatcher {
    scope: Scope,
    id: Option<String>,
    aliases: Vec<String>,
}

impl ScopeMatcher {
    async fn resolve(plane: &ControlPlane, scope: &Scope) -> std::result::Result<Self, SourceError> {
        let key = scope.key();
        let (id, name) = match scope {
            Scope::Service(_) => plane
                .services
                .get(key)
                .await?
                .map(|s| (s.id, s.name))
                .unwrap_or_default(),
            Scope::Route(_) => plane
                .routes
                .get(key)
                .await?
                .map(|r| (r.id, r.name))
                .unwrap_or_default(),
            Scope::Consumer(_) => plane
                .consumers
                .get(key)
                .await?
                .map(|c| (c.id, c.username))
                .unwrap_or_default(),
            Scope::Upstream(_) => plane
                .upstreams
                .get(key)
                .await?
                .map(|u| (u.id, u.name))
                .unwrap_or_default(),
        };

        let mut aliases = vec![key.to_string()];
        aliases.extend(id.clone());
        aliases.extend(name);
        Ok(Self {
            scope: scope.clone(),
            id,
            aliases,
        })
    }

    /// The scope addressed by the parent's id, `None` when the parent does
    /// not exist on this plane.
    fn canonical(&self) -> Option<Scope> {
        let id = self.id.clone()?;
        Some(match self.scope {
            Scope::Service(_) => Scope::Service(id),
            Scope::Route(_) => Scope::Route(id),
            Scope::Consumer(_) => Scope::Consumer(id),
            Scope::Upstream(_) => Scope::Upstream(id),
        })
    }

    fn accepts<T: ManagedEntity>(&self, entity: &T) -> bool {
        self.scope
            .reference_of(entity)
            .is_some_and(|r| self.aliases.iter().any(|a| r.matches(a)))
    }
}

/// Drain `plane`'s collection of `T` restricted to every scope in `scopes`.
///
/// With `nested` the first scope is resolved to its parent id and listed
/// through the nested collection endpoint; all remaining scopes are filtered
/// client-side.
async fn fetch_filtered<T: ManagedEntity>(
    plane: &ControlPlane,
    scopes: &[Scope],
    nested: bool,
) -> std::result::Result<Vec<T>, SourceError> {
    let (listed, client_side) = match scopes.split_first() {
        Some((first, rest)) if nested => (Some(first), rest),
        _ => (None, scopes),
    };

    let manager = plane.manager::<T>();
    let items = match listed {
        Some(scope) => {
            let matcher = ScopeMatcher::resolve(plane, scope).await?;
            let Some(parent) = matcher.canonical() else {
                debug!(
                    "[UnifiedQueryService] {} parent '{}' not found on {}",
                    T::KIND,
                    scope.key(),
                    plane.label
                );
                return Ok(Vec::new());
            };
            manager.list_all(Some(&parent)).await?
        }
        None => manager.list_all(None).await?,
    };
    if client_side.is_empty() {
        return Ok(items);
    }

    let mut matchers = Vec::with_capacity(client_side.len());
    for scope in client_side {
        matchers.push(ScopeMatcher::resolve(plane, scope).await?);
    }
    Ok(items
        .into_iter()
        .filter(|item| matchers.iter().all(|m| m.accepts(item)))
        .collect())
}

/// Read-only query service over a Gateway and an optional Konnect control plane.
#[derive(Debug, Clone)]
pub struct UnifiedQueryService {
    gateway: ControlPlane,
    konnect: Option<ControlPlane>,
}

impl UnifiedQueryService {
    pub fn new(gateway: ControlPlane, konnect: Option<ControlPlane>) -> Self {
        Self { gateway, konnect }
    }

    pub fn konnect_configured(&self) -> bool {
        self.konnect.is_some()
    }

    pub fn gateway(&self) -> &ControlPlane {
        &self.gateway
    }

    pub fn konnect(&self) -> Option<&ControlPlane> {
        self.konnect.as_ref()
    }

    #[instrument(skip(self))]
    pub async fn list_services(&self) -> Result<UnifiedEntityList<Service>> {
        self.list_unified(&[]).await
    }

    #[instrument(skip(self))]
    pub async fn list_routes(&self, filter: &RouteFilter) -> Result<UnifiedEntityList<Route>> {
        self.list_unified(&filter.scopes()).await
    }

    #[instrument(skip(self))]
    pub async fn list_consumers(&self) -> Result<UnifiedEntityList<Consumer>> {
        self.list_unified(&[]).await
    }

    #[instrument(skip(self))]
    pub async fn list_plugins(&self, filter: &PluginFilter) -> Result<UnifiedEntityList<Plugin>> {
        self.list_unified(&filter.scopes()).await
    }

    #[instrument(skip(self))]
    pub async fn list_upstreams(&self) -> Result<UnifiedEntityList<Upstream>> {
        self.list_unified(&[]).await
    }

    /// Targets of one upstream. An upstream missing on one side contributes
    /// no targets from that side.
    #[instrument(skip(self))]
    pub async fn list_targets(&self, upstream: &str) -> Result<UnifiedEntityList<Target>> {
        let scope = Scope::Upstream(upstream.to_string());
        let scopes = std::slice::from_ref(&scope);

        let gateway = async {
            not_found_as_empty(fetch_filtered::<Target>(&self.gateway, scopes, true).await)
        };
        let konnect = async {
            match &self.konnect {
                Some(plane) => not_found_as_empty(fetch_filtered::<Target>(plane, scopes, true).await),
                None => Ok(Vec::new()),
            }
        };
        let (gw, kn) = tokio::try_join!(gateway, konnect)?;
        merge_entities(gw, kn)
    }

    /// Per-kind counts; `kinds` defaults to every kind. Targets are summed
    /// over all upstreams known to either side.
    #[instrument(skip(self))]
    pub async fn get_sync_summary(
        &self,
        kinds: Option<&[EntityKind]>,
    ) -> Result<BTreeMap<EntityKind, KindSummary>> {
        let kinds = kinds.unwrap_or(&EntityKind::ALL);
        let mut summary = BTreeMap::new();

        for kind in kinds {
            let counts = match kind {
                EntityKind::Service => KindSummary::of(&self.list_services().await?),
                EntityKind::Route => KindSummary::of(&self.list_routes(&RouteFilter::default()).await?),
                EntityKind::Consumer => KindSummary::of(&self.list_consumers().await?),
                EntityKind::Plugin => {
                    KindSummary::of(&self.list_plugins(&PluginFilter::default()).await?)
                }
                EntityKind::Upstream => KindSummary::of(&self.list_upstreams().await?),
                EntityKind::Target => {
                    let mut total = KindSummary::default();
                    for upstream in self.list_upstreams().await?.keys() {
                        total.absorb(KindSummary::of(&self.list_targets(upstream).await?));
                    }
                    total
                }
            };
            debug!("[UnifiedQueryService] {}: {:?}", kind, counts);
            summary.insert(*kind, counts);
        }

        info!(
            "[UnifiedQueryService] Sync summary over {} kinds (konnect configured: {})",
            summary.len(),
            self.konnect_configured()
        );
        Ok(summary)
    }

    async fn list_unified<T: ManagedEntity>(&self, scopes: &[Scope]) -> Result<UnifiedEntityList<T>> {
        let gateway = fetch_filtered::<T>(&self.gateway, scopes, false);
        let konnect = async {
            match &self.konnect {
                Some(plane) => fetch_filtered::<T>(plane, scopes, true).await,
                None => Ok(Vec::new()),
            }
        };
        let (gw, kn) = tokio::try_join!(gateway, konnect)?;
        debug!(
            "[UnifiedQueryService] {}: {} from Gateway, {} from Konnect",
            T::KIND,
            gw.len(),
            kn.len()
        );
        merge_entities(gw, kn)
    }
}

fn not_found_as_empty<T>(
    result: std::result::Result<Vec<T>, SourceError>,
) -> std::result::Result<Vec<T>, SourceError> {
    match result {
        Err(err) if err.is_not_found() => Ok(Vec::new()),
        other => other,
    }
}
