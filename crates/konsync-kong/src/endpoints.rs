use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::client::AdminClient;
use konsync_api::{Credential, CredentialKind};
use konsync_core::{CredentialManager, DeclarativeEndpoint, ListQuery, Page, Result};

/// Consumer credentials below `/consumers/{consumer}/{kind}`.
pub struct HttpCredentialManager {
    client: Arc<AdminClient>,
}

impl HttpCredentialManager {
    pub fn new(client: Arc<AdminClient>) -> Self {
        Self { client }
    }
}

pub fn credential_path(consumer: &str, kind: CredentialKind) -> String {
    format!("consumers/{}/{}", consumer, kind.path_segment())
}

#[async_trait]
impl CredentialManager for HttpCredentialManager {
    async fn list_credentials(
        &self,
        consumer: &str,
        kind: CredentialKind,
        query: &ListQuery,
    ) -> Result<Page<Credential>> {
        self.client
            .list_page(&credential_path(consumer, kind), query)
            .await
    }
}

/// `POST /config` of a DB-less Gateway.
pub struct HttpDeclarativeEndpoint {
    client: Arc<AdminClient>,
}

impl HttpDeclarativeEndpoint {
    pub fn new(client: Arc<AdminClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DeclarativeEndpoint for HttpDeclarativeEndpoint {
    async fn replace_config(&self, config: &serde_json::Value) -> Result<()> {
        self.client.post_unit("config", config).await?;
        info!(
            "[HttpDeclarativeEndpoint] Replaced configuration at {}",
            self.client.base_url()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_paths() {
        assert_eq!(
            credential_path("alice", CredentialKind::KeyAuth),
            "consumers/alice/key-auth"
        );
        assert_eq!(credential_path("c-1", CredentialKind::Acl), "consumers/c-1/acls");
        assert_eq!(credential_path("c-1", CredentialKind::Jwt), "consumers/c-1/jwt");
    }
}
