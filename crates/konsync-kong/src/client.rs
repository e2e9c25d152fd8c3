use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error};

use konsync_core::{ListQuery, Page, Result, SourceError};

/// Longest response body kept in an error message.
const MAX_ERROR_BODY: usize = 500;

/// How the admin token is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    /// `Kong-Admin-Token: <token>` (self-hosted Gateway, Enterprise RBAC)
    AdminToken,
    /// `Authorization: Bearer <token>` (Konnect personal/system access tokens)
    Bearer,
}

/// Thin JSON client for one Admin API root.
#[derive(Debug, Clone)]
pub struct AdminClient {
    base_url: String,
    client: reqwest::Client,
    page_size: usize,
}

impl AdminClient {
    pub fn new(
        base_url: &str,
        token: Option<&str>,
        auth: AuthStyle,
        timeout: Duration,
        page_size: usize,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(token) = token {
            let (name, value) = match auth {
                AuthStyle::AdminToken => ("Kong-Admin-Token", token.to_string()),
                AuthStyle::Bearer => ("Authorization", format!("Bearer {}", token)),
            };
            let mut value = HeaderValue::from_str(&value).map_err(|e| SourceError::Transport {
                url: base_url.to_string(),
                message: format!("invalid token: {}", e),
            })?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build().map_err(|e| SourceError::Transport {
            url: base_url.to_string(),
            message: format!("failed to build HTTP client: {}", e),
        })?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            page_size,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Query parameters for one list call.
    pub fn list_params(&self, query: &ListQuery) -> Vec<(String, String)> {
        let mut params = vec![(
            "size".to_string(),
            query.size.unwrap_or(self.page_size).to_string(),
        )];
        if let Some(offset) = &query.offset {
            params.push(("offset".to_string(), offset.clone()));
        }
        if !query.tags.is_empty() {
            params.push(("tags".to_string(), query.tags.join(",")));
        }
        params
    }

    /// GET one page of a collection.
    pub async fn list_page<T: DeserializeOwned>(&self, path: &str, query: &ListQuery) -> Result<Page<T>> {
        let url = self.url(path);
        let body = self
            .send(Method::GET, &url, &self.list_params(query), None::<&()>)
            .await?
            .ok_or_else(|| not_found_http(&url))?;
        parse_page(&body, &url)
    }

    /// GET a single object; 404 becomes `None`.
    pub async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let url = self.url(path);
        match self.send(Method::GET, &url, &[], None::<&()>).await? {
            Some(body) => decode(&body, &url).map(Some),
            None => Ok(None),
        }
    }

    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        self.write(Method::POST, path, body).await
    }

    pub async fn patch<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        self.write(Method::PATCH, path, body).await
    }

    /// POST whose response body is ignored.
    pub async fn post_unit<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        let url = self.url(path);
        self.send(Method::POST, &url, &[], Some(body))
            .await?
            .ok_or_else(|| not_found_http(&url))?;
        Ok(())
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        let url = self.url(path);
        self.send(Method::DELETE, &url, &[], None::<&()>)
            .await?
            .ok_or_else(|| not_found_http(&url))?;
        Ok(())
    }

    async fn write<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = self.url(path);
        let text = self
            .send(method, &url, &[], Some(body))
            .await?
            .ok_or_else(|| not_found_http(&url))?;
        decode(&text, &url)
    }

    /// Send a request. `Ok(None)` means 404; other failures are errors.
    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        params: &[(String, String)],
        body: Option<&B>,
    ) -> Result<Option<String>> {
        debug!("[AdminClient] {} {}", method, url);
        let mut request = self.client.request(method.clone(), url).query(params);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error(e, url, method.as_str()))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| SourceError::Transport {
            url: url.to_string(),
            message: format!("failed to read response body: {}", e),
        })?;

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            error!("[AdminClient] HTTP {} from {} {}", status.as_u16(), method, url);
            return Err(SourceError::Http {
                status: status.as_u16(),
                url: url.to_string(),
                body: truncate_body(&text),
            });
        }
        Ok(Some(text))
    }
}

fn transport_error(e: reqwest::Error, url: &str, operation: &str) -> SourceError {
    let message = if e.is_timeout() {
        format!("{} timed out", operation)
    } else if e.is_connect() {
        format!("{} could not connect: {}", operation, e)
    } else {
        format!("{} failed: {}", operation, e)
    };
    SourceError::Transport {
        url: url.to_string(),
        message,
    }
}

fn not_found_http(url: &str) -> SourceError {
    SourceError::Http {
        status: 404,
        url: url.to_string(),
        body: String::new(),
    }
}

fn decode<T: DeserializeOwned>(body: &str, url: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| SourceError::Decode {
        url: url.to_string(),
        message: e.to_string(),
    })
}

/// Parse the `{"data": [...], "next": ..., "offset": ...}` envelope.
pub fn parse_page<T: DeserializeOwned>(body: &str, url: &str) -> Result<Page<T>> {
    decode(body, url)
}

pub fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((cut, _)) => format!("{}... (truncated)", &body[..cut]),
        None => body.to_string(),
    }
}
