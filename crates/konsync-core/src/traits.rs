//! Source manager traits
//!
//! A source manager is the typed boundary to one control plane (Gateway or
//! Konnect) for one entity kind. The sync engine only ever talks to these
//! traits; HTTP mapping lives in `konsync-kong`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use konsync_api::{Credential, CredentialKind, EntityKind, EntityRef, KongEntity};

/// Pagination and tag filter parameters for one list call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub size: Option<usize>,
    pub offset: Option<String>,
    pub tags: Vec<String>,
}

impl ListQuery {
    pub fn with_size(size: usize) -> Self {
        Self {
            size: Some(size),
            ..Default::default()
        }
    }

    /// Same query, positioned at the given cursor.
    pub fn after(&self, offset: impl Into<String>) -> Self {
        Self {
            offset: Some(offset.into()),
            ..self.clone()
        }
    }
}

/// One page of results in the Kong envelope (`{"data": [...], "offset": ...}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<String>,
}

impl<T> Page<T> {
    pub fn last(data: Vec<T>) -> Self {
        Self { data, offset: None }
    }

    /// Cursor for the next page, `None` when this is the last one.
    pub fn next_cursor(&self) -> Option<&str> {
        self.offset.as_deref().filter(|o| !o.is_empty())
    }
}

/// Parent entity a nested listing is restricted to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Service(String),
    Route(String),
    Consumer(String),
    Upstream(String),
}

impl Scope {
    /// Admin API collection of the parent (`services`, `routes`, ...).
    pub fn collection(&self) -> &'static str {
        match self {
            Scope::Service(_) => "services",
            Scope::Route(_) => "routes",
            Scope::Consumer(_) => "consumers",
            Scope::Upstream(_) => "upstreams",
        }
    }

    /// Id or name of the parent.
    pub fn key(&self) -> &str {
        match self {
            Scope::Service(k) | Scope::Route(k) | Scope::Consumer(k) | Scope::Upstream(k) => k,
        }
    }

    /// The parent reference `entity` holds for this scope's kind, if any.
    pub fn reference_of<'a, T: ScopedEntity>(&self, entity: &'a T) -> Option<&'a EntityRef> {
        entity.scope_ref(self)
    }
}

/// Entities that reference parent entities.
pub trait ScopedEntity {
    fn scope_ref(&self, _scope: &Scope) -> Option<&EntityRef> {
        None
    }

    /// Visit every foreign-key reference with the kind it points to.
    fn visit_refs(&mut self, _visit: &mut dyn FnMut(EntityKind, &mut EntityRef)) {}
}

impl ScopedEntity for konsync_api::Service {}
impl ScopedEntity for konsync_api::Consumer {}
impl ScopedEntity for konsync_api::Upstream {}

impl ScopedEntity for konsync_api::Route {
    fn scope_ref(&self, scope: &Scope) -> Option<&EntityRef> {
        match scope {
            Scope::Service(_) => self.service.as_ref(),
            _ => None,
        }
    }

    fn visit_refs(&mut self, visit: &mut dyn FnMut(EntityKind, &mut EntityRef)) {
        if let Some(service) = self.service.as_mut() {
            visit(EntityKind::Service, service);
        }
    }
}

impl ScopedEntity for konsync_api::Plugin {
    fn scope_ref(&self, scope: &Scope) -> Option<&EntityRef> {
        match scope {
            Scope::Service(_) => self.service.as_ref(),
            Scope::Route(_) => self.route.as_ref(),
            Scope::Consumer(_) => self.consumer.as_ref(),
            Scope::Upstream(_) => None,
        }
    }

    fn visit_refs(&mut self, visit: &mut dyn FnMut(EntityKind, &mut EntityRef)) {
        if let Some(service) = self.service.as_mut() {
            visit(EntityKind::Service, service);
        }
        if let Some(route) = self.route.as_mut() {
            visit(EntityKind::Route, route);
        }
        if let Some(consumer) = self.consumer.as_mut() {
            visit(EntityKind::Consumer, consumer);
        }
    }
}

impl ScopedEntity for konsync_api::Target {
    fn scope_ref(&self, scope: &Scope) -> Option<&EntityRef> {
        match scope {
            Scope::Upstream(_) => self.upstream.as_ref(),
            _ => None,
        }
    }

    fn visit_refs(&mut self, visit: &mut dyn FnMut(EntityKind, &mut EntityRef)) {
        if let Some(upstream) = self.upstream.as_mut() {
            visit(EntityKind::Upstream, upstream);
        }
    }
}

/// Paginated CRUD access to one entity kind on one control plane.
#[async_trait]
pub trait EntityManager<T>: Send + Sync
where
    T: KongEntity,
{
    /// List one page of the unscoped collection.
    async fn list(&self, query: &ListQuery) -> Result<Page<T>>;

    /// List one page of the collection nested below `scope`.
    async fn list_scoped(&self, scope: &Scope, query: &ListQuery) -> Result<Page<T>>;

    async fn get(&self, id_or_name: &str) -> Result<Option<T>>;

    async fn create(&self, entity: &T) -> Result<T>;

    /// Update the entity addressed by `id_or_name` with the desired state.
    async fn update(&self, id_or_name: &str, entity: &T) -> Result<T>;

    /// Delete the given entity (nested kinds need the parent reference it carries).
    async fn delete(&self, entity: &T) -> Result<()>;

    /// Drain every page, following cursors until the last page.
    async fn list_all(&self, scope: Option<&Scope>) -> Result<Vec<T>> {
        let mut query = ListQuery::default();
        let mut items = Vec::new();

        loop {
            let page = match scope {
                Some(scope) => self.list_scoped(scope, &query).await?,
                None => self.list(&query).await?,
            };
            items.extend(page.data.into_iter());

            let next = match page.offset.as_deref().filter(|o| !o.is_empty()) {
                Some(next) => next.to_string(),
                None => break,
            };
            if query.offset.as_deref() == Some(next.as_str()) {
                warn!(
                    "[EntityManager] {} pagination returned the same cursor twice, stopping",
                    T::KIND
                );
                break;
            }
            query = query.after(next);
        }

        Ok(items)
    }
}

/// Read access to consumer credentials.
#[async_trait]
pub trait CredentialManager: Send + Sync {
    async fn list_credentials(
        &self,
        consumer: &str,
        kind: CredentialKind,
        query: &ListQuery,
    ) -> Result<Page<Credential>>;

    async fn list_all_credentials(
        &self,
        consumer: &str,
        kind: CredentialKind,
    ) -> Result<Vec<Credential>> {
        let mut query = ListQuery::default();
        let mut items = Vec::new();
        loop {
            let page = self.list_credentials(consumer, kind, &query).await?;
            items.extend(page.data.into_iter());
            match page.offset.filter(|o| !o.is_empty()) {
                Some(next) if query.offset.as_deref() != Some(next.as_str()) => {
                    query = query.after(next);
                }
                _ => break,
            }
        }
        Ok(items)
    }
}

/// Replace-all configuration endpoint of a DB-less Gateway.
#[async_trait]
pub trait DeclarativeEndpoint: Send + Sync {
    async fn replace_config(&self, config: &serde_json::Value) -> Result<()>;
}
