//! In-memory source managers
//!
//! A control plane held entirely in memory. Used as an offline stand-in for a
//! Gateway or Konnect and as the fixture behind the engine's tests:
//! - pagination with a configurable page size
//! - scoped listing through entity references
//! - failure injection for reads and per-entity writes

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Result, SourceError};
use crate::plane::ControlPlane;
use crate::traits::{
    CredentialManager, DeclarativeEndpoint, EntityManager, ListQuery, Page, Scope, ScopedEntity,
};
use konsync_api::{
    Consumer, Credential, CredentialKind, KongEntity, Plugin, Route, Service, Target, Upstream,
};

const DEFAULT_PAGE_SIZE: usize = 100;

/// Entity store for one kind with Admin API-like paging semantics.
pub struct InMemoryManager<T> {
    items: RwLock<Vec<T>>,
    page_size: AtomicUsize,
    id_prefix: String,
    next_id: AtomicU64,
    writes: AtomicUsize,
    list_calls: AtomicUsize,
    scoped_list_calls: AtomicUsize,
    read_failure: Mutex<Option<String>>,
    failing_keys: Mutex<HashSet<String>>,
}

impl<T> InMemoryManager<T>
where
    T: KongEntity + ScopedEntity,
{
    pub fn new(id_prefix: impl Into<String>) -> Self {
        Self {
            items: RwLock::new(Vec::new()),
            page_size: AtomicUsize::new(DEFAULT_PAGE_SIZE),
            id_prefix: id_prefix.into(),
            next_id: AtomicU64::new(1),
            writes: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            scoped_list_calls: AtomicUsize::new(0),
            read_failure: Mutex::new(None),
            failing_keys: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_page_size(self, page_size: usize) -> Self {
        self.set_page_size(page_size);
        self
    }

    pub fn set_page_size(&self, page_size: usize) {
        self.page_size.store(page_size.max(1), Ordering::SeqCst);
    }

    /// Seed the store; entities without an id get one assigned.
    pub fn with_items(self, items: Vec<T>) -> Self {
        let seeded: Vec<T> = items.into_iter().map(|e| self.ensure_id(e)).collect();
        Self {
            items: RwLock::new(seeded),
            ..self
        }
    }

    /// Every list call fails with a transport error until cleared.
    pub fn fail_reads(&self, message: impl Into<String>) {
        if let Ok(mut failure) = self.read_failure.lock() {
            *failure = Some(message.into());
        }
    }

    /// Writes to the entity with this identity key fail with a transport error.
    pub fn fail_writes_for(&self, identity_key: impl Into<String>) {
        if let Ok(mut keys) = self.failing_keys.lock() {
            keys.insert(identity_key.into());
        }
    }

    pub async fn snapshot(&self) -> Vec<T> {
        self.items.read().await.clone()
    }

    /// Number of successful create/update/delete calls.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of unscoped `list` page requests served.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of `list_scoped` page requests served.
    pub fn scoped_list_calls(&self) -> usize {
        self.scoped_list_calls.load(Ordering::SeqCst)
    }

    fn ensure_id(&self, entity: T) -> T {
        if entity.id().is_some() {
            return entity;
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        entity.with_id(&format!("{}-{}", self.id_prefix, n))
    }

    fn url(&self) -> String {
        format!("memory://{}/{}", self.id_prefix, T::KIND)
    }

    fn check_read(&self) -> Result<()> {
        let failure = self.read_failure.lock().ok().and_then(|f| f.clone());
        match failure {
            Some(message) => Err(SourceError::Transport {
                url: self.url(),
                message,
            }),
            None => Ok(()),
        }
    }

    fn check_write(&self, entity: &T) -> Result<()> {
        let key = entity.identity_key().ok();
        let failing = match (&key, self.failing_keys.lock()) {
            (Some(key), Ok(keys)) => keys.contains(key),
            _ => false,
        };
        if failing {
            return Err(SourceError::Transport {
                url: self.url(),
                message: format!("injected write failure for {}", key.unwrap_or_default()),
            });
        }
        Ok(())
    }

    fn matches_key(entity: &T, key: &str) -> bool {
        entity.id() == Some(key) || entity.identity_key().ok().as_deref() == Some(key)
    }

    fn paginate(&self, items: Vec<T>, query: &ListQuery) -> Result<Page<T>> {
        let start = match query.offset.as_deref() {
            Some(offset) => offset.parse::<usize>().map_err(|_| SourceError::Http {
                status: 400,
                url: self.url(),
                body: format!("invalid offset '{}'", offset),
            })?,
            None => 0,
        };

        let matching: Vec<T> = items
            .into_iter()
            .filter(|e| query.tags.is_empty() || Self::has_tags(e, &query.tags))
            .collect();
        let total = matching.len();
        let size = query
            .size
            .unwrap_or_else(|| self.page_size.load(Ordering::SeqCst))
            .max(1);
        let end = (start + size).min(total);

        let data = matching
            .into_iter()
            .skip(start)
            .take(end.saturating_sub(start))
            .collect();
        let offset = (end < total).then(|| end.to_string());
        Ok(Page { data, offset })
    }

    fn has_tags(entity: &T, tags: &[String]) -> bool {
        let fields = entity.field_map();
        let Some(Value::Array(entity_tags)) = fields.get("tags") else {
            return false;
        };
        tags.iter()
            .all(|t| entity_tags.iter().any(|et| et.as_str() == Some(t.as_str())))
    }
}

#[async_trait]
impl<T> EntityManager<T> for InMemoryManager<T>
where
    T: KongEntity + ScopedEntity,
{
    async fn list(&self, query: &ListQuery) -> Result<Page<T>> {
        self.check_read()?;
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let items = self.items.read().await.clone();
        self.paginate(items, query)
    }

    async fn list_scoped(&self, scope: &Scope, query: &ListQuery) -> Result<Page<T>> {
        self.check_read()?;
        self.scoped_list_calls.fetch_add(1, Ordering::SeqCst);
        let items: Vec<T> = self
            .items
            .read()
            .await
            .iter()
            .filter(|e| {
                scope
                    .reference_of(*e)
                    .map(|r| r.matches(scope.key()))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        self.paginate(items, query)
    }

    async fn get(&self, id_or_name: &str) -> Result<Option<T>> {
        self.check_read()?;
        Ok(self
            .items
            .read()
            .await
            .iter()
            .find(|e| Self::matches_key(e, id_or_name))
            .cloned())
    }

    async fn create(&self, entity: &T) -> Result<T> {
        self.check_write(entity)?;
        let created = self.ensure_id(entity.clone());
        debug!("[InMemoryManager] create {} {:?}", T::KIND, created.id());
        self.items.write().await.push(created.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(created)
    }

    async fn update(&self, id_or_name: &str, entity: &T) -> Result<T> {
        self.check_write(entity)?;
        let mut items = self.items.write().await;
        let position = items
            .iter()
            .position(|e| Self::matches_key(e, id_or_name))
            .ok_or_else(|| SourceError::NotFound {
                kind: T::KIND,
                key: id_or_name.to_string(),
            })?;

        let updated = match items[position].id() {
            Some(id) => entity.clone().with_id(id),
            None => entity.clone(),
        };
        items[position] = updated.clone();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }

    async fn delete(&self, entity: &T) -> Result<()> {
        self.check_write(entity)?;
        let key = entity
            .id()
            .map(str::to_string)
            .or_else(|| entity.identity_key().ok())
            .unwrap_or_default();
        let mut items = self.items.write().await;
        let before = items.len();
        items.retain(|e| !Self::matches_key(e, &key));
        if items.len() == before {
            return Err(SourceError::NotFound {
                kind: T::KIND,
                key,
            });
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Credentials keyed by consumer id or username.
#[derive(Default)]
pub struct InMemoryCredentials {
    items: RwLock<Vec<(String, CredentialKind, Credential)>>,
}

impl InMemoryCredentials {
    pub async fn insert(&self, consumer: &str, kind: CredentialKind, credential: Credential) {
        self.items
            .write()
            .await
            .push((consumer.to_string(), kind, credential));
    }
}

#[async_trait]
impl CredentialManager for InMemoryCredentials {
    async fn list_credentials(
        &self,
        consumer: &str,
        kind: CredentialKind,
        _query: &ListQuery,
    ) -> Result<Page<Credential>> {
        let data = self
            .items
            .read()
            .await
            .iter()
            .filter(|(c, k, _)| c == consumer && *k == kind)
            .map(|(_, _, cred)| cred.clone())
            .collect();
        Ok(Page::last(data))
    }
}

/// Declarative endpoint that keeps the last pushed configuration.
#[derive(Default)]
pub struct RecordingDeclarativeEndpoint {
    last: Mutex<Option<Value>>,
}

impl RecordingDeclarativeEndpoint {
    pub fn last_config(&self) -> Option<Value> {
        self.last.lock().ok().and_then(|l| l.clone())
    }
}

#[async_trait]
impl DeclarativeEndpoint for RecordingDeclarativeEndpoint {
    async fn replace_config(&self, config: &Value) -> Result<()> {
        if let Ok(mut last) = self.last.lock() {
            *last = Some(config.clone());
        }
        Ok(())
    }
}

/// A full control plane backed by [`InMemoryManager`]s, with typed handles
/// for seeding and inspection.
pub struct InMemoryControlPlane {
    pub label: String,
    pub services: Arc<InMemoryManager<Service>>,
    pub routes: Arc<InMemoryManager<Route>>,
    pub consumers: Arc<InMemoryManager<Consumer>>,
    pub plugins: Arc<InMemoryManager<Plugin>>,
    pub upstreams: Arc<InMemoryManager<Upstream>>,
    pub targets: Arc<InMemoryManager<Target>>,
    pub credentials: Arc<InMemoryCredentials>,
    pub declarative: Arc<RecordingDeclarativeEndpoint>,
}

impl InMemoryControlPlane {
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        let prefix = label.to_ascii_lowercase();
        Self {
            services: Arc::new(InMemoryManager::new(format!("{}-svc", prefix))),
            routes: Arc::new(InMemoryManager::new(format!("{}-rt", prefix))),
            consumers: Arc::new(InMemoryManager::new(format!("{}-con", prefix))),
            plugins: Arc::new(InMemoryManager::new(format!("{}-plg", prefix))),
            upstreams: Arc::new(InMemoryManager::new(format!("{}-ups", prefix))),
            targets: Arc::new(InMemoryManager::new(format!("{}-tgt", prefix))),
            credentials: Arc::new(InMemoryCredentials::default()),
            declarative: Arc::new(RecordingDeclarativeEndpoint::default()),
            label,
        }
    }

    pub fn with_services(mut self, items: Vec<Service>) -> Self {
        let manager = InMemoryManager::new(format!("{}-svc", self.prefix()));
        self.services = Arc::new(manager.with_items(items));
        self
    }

    pub fn with_routes(mut self, items: Vec<Route>) -> Self {
        let manager = InMemoryManager::new(format!("{}-rt", self.prefix()));
        self.routes = Arc::new(manager.with_items(items));
        self
    }

    pub fn with_consumers(mut self, items: Vec<Consumer>) -> Self {
        let manager = InMemoryManager::new(format!("{}-con", self.prefix()));
        self.consumers = Arc::new(manager.with_items(items));
        self
    }

    pub fn with_plugins(mut self, items: Vec<Plugin>) -> Self {
        let manager = InMemoryManager::new(format!("{}-plg", self.prefix()));
        self.plugins = Arc::new(manager.with_items(items));
        self
    }

    pub fn with_upstreams(mut self, items: Vec<Upstream>) -> Self {
        let manager = InMemoryManager::new(format!("{}-ups", self.prefix()));
        self.upstreams = Arc::new(manager.with_items(items));
        self
    }

    pub fn with_targets(mut self, items: Vec<Target>) -> Self {
        let manager = InMemoryManager::new(format!("{}-tgt", self.prefix()));
        self.targets = Arc::new(manager.with_items(items));
        self
    }

    fn prefix(&self) -> String {
        self.label.to_ascii_lowercase()
    }

    /// Type-erased view consumed by the sync engine.
    pub fn plane(&self) -> ControlPlane {
        ControlPlane {
            label: self.label.clone(),
            services: self.services.clone(),
            routes: self.routes.clone(),
            consumers: self.consumers.clone(),
            plugins: self.plugins.clone(),
            upstreams: self.upstreams.clone(),
            targets: self.targets.clone(),
            credentials: Some(self.credentials.clone()),
            declarative: Some(self.declarative.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use konsync_api::EntityRef;

    #[tokio::test]
    async fn test_list_all_drains_every_page() {
        let services: Vec<Service> = (0..7)
            .map(|i| Service::new(format!("svc-{}", i), "h.local"))
            .collect();
        let manager = InMemoryManager::new("gw").with_page_size(3).with_items(services);

        let all = manager.list_all(None).await.unwrap();
        assert_eq!(all.len(), 7);
        assert_eq!(manager.list_calls(), 3);
        assert!(all.iter().all(|s| s.id.is_some()));
    }

    #[tokio::test]
    async fn test_exact_multiple_of_page_size_terminates() {
        let services: Vec<Service> = (0..4)
            .map(|i| Service::new(format!("svc-{}", i), "h.local"))
            .collect();
        let manager = InMemoryManager::new("gw").with_page_size(2).with_items(services);

        let all = manager.list_all(None).await.unwrap();
        assert_eq!(all.len(), 4);
    }

    #[tokio::test]
    async fn test_scoped_listing_filters_by_reference() {
        let routes = vec![
            Route::new("a", EntityRef::by_id("svc-1")),
            Route::new("b", EntityRef::by_id("svc-2")),
        ];
        let manager = InMemoryManager::new("kn").with_items(routes);

        let scoped = manager
            .list_all(Some(&Scope::Service("svc-2".into())))
            .await
            .unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].name.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let manager: InMemoryManager<Service> = InMemoryManager::new("gw");
        manager.fail_writes_for("api");
        let err = manager.create(&Service::new("api", "h")).await.unwrap_err();
        assert!(matches!(err, SourceError::Transport { .. }));
        assert_eq!(manager.write_count(), 0);

        manager.fail_reads("connection refused");
        assert!(manager.list(&ListQuery::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_update_preserves_server_id() {
        let manager = InMemoryManager::new("gw").with_items(vec![Service::new("api", "old.local")]);
        let updated = manager
            .update("api", &Service::new("api", "new.local"))
            .await
            .unwrap();
        assert_eq!(updated.id.as_deref(), Some("gw-1"));
        assert_eq!(manager.snapshot().await[0].host.as_deref(), Some("new.local"));
    }
}
