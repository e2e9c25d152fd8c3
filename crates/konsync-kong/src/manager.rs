use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info};

use crate::client::AdminClient;
use crate::paths::{create_path, item_path, scoped_path, AdminResource};
use konsync_api::KongEntity;
use konsync_core::{EntityManager, ListQuery, Page, Result, Scope, SourceError};

/// `EntityManager` for one kind over the Admin API.
pub struct HttpEntityManager<T> {
    client: Arc<AdminClient>,
    _kind: PhantomData<fn() -> T>,
}

impl<T> HttpEntityManager<T> {
    pub fn new(client: Arc<AdminClient>) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

impl<T: AdminResource> HttpEntityManager<T> {
    fn nested_only_error(operation: &str) -> SourceError {
        SourceError::Unsupported(format!("{} {} without a parent", operation, T::COLLECTION))
    }

    fn address(entity: &T) -> Result<String> {
        entity
            .id()
            .map(str::to_string)
            .or_else(|| entity.identity_key().ok())
            .ok_or_else(|| {
                SourceError::Unsupported(format!("addressing a {} without id or identity", T::KIND))
            })
    }
}

#[async_trait]
impl<T: AdminResource> EntityManager<T> for HttpEntityManager<T> {
    async fn list(&self, query: &ListQuery) -> Result<Page<T>> {
        if T::NESTED_ONLY {
            return Err(Self::nested_only_error("listing"));
        }
        self.client.list_page(T::COLLECTION, query).await
    }

    async fn list_scoped(&self, scope: &Scope, query: &ListQuery) -> Result<Page<T>> {
        self.client.list_page(&scoped_path::<T>(scope), query).await
    }

    async fn get(&self, id_or_name: &str) -> Result<Option<T>> {
        if T::NESTED_ONLY {
            return Err(Self::nested_only_error("fetching"));
        }
        self.client.get_optional(&item_path::<T>(None, id_or_name)).await
    }

    async fn create(&self, entity: &T) -> Result<T> {
        if T::NESTED_ONLY && entity.parent().is_none() {
            return Err(Self::nested_only_error("creating"));
        }
        let created: T = self.client.post(&create_path(entity), entity).await?;
        info!("[HttpEntityManager] Created {} {:?}", T::KIND, created.id());
        Ok(created)
    }

    async fn update(&self, id_or_name: &str, entity: &T) -> Result<T> {
        let parent = entity.parent();
        if T::NESTED_ONLY && parent.is_none() {
            return Err(Self::nested_only_error("updating"));
        }
        let path = item_path::<T>(parent.as_ref(), id_or_name);
        let updated = self.client.patch(&path, entity).await?;
        debug!("[HttpEntityManager] Updated {} {}", T::KIND, id_or_name);
        Ok(updated)
    }

    async fn delete(&self, entity: &T) -> Result<()> {
        let parent = entity.parent();
        if T::NESTED_ONLY && parent.is_none() {
            return Err(Self::nested_only_error("deleting"));
        }
        let key = Self::address(entity)?;
        self.client.delete(&item_path::<T>(parent.as_ref(), &key)).await?;
        info!("[HttpEntityManager] Deleted {} {}", T::KIND, key);
        Ok(())
    }
}
