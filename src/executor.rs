//! Single HTTP calls against the catalog, always routed through the
//! [`RateLimiter`].
//!
//! Successful responses come back as [`Fetched`], which carries the caching
//! headers next to the decoded body rather than inside it.

use crate::error::{ApiError, ApiResult};
use crate::rate_limit::RateLimiter;
use reqwest::header::{HeaderMap, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE, ETAG, LAST_MODIFIED};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// Caching headers captured from a response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMeta {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub cache_control: Option<String>,
}

impl ResponseMeta {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let get = |name| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Self {
            etag: get(ETAG),
            last_modified: get(LAST_MODIFIED),
            cache_control: get(CACHE_CONTROL),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none() && self.cache_control.is_none()
    }
}

/// A decoded response body plus its out-of-band [`ResponseMeta`].
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub value: T,
    pub meta: ResponseMeta,
}

impl<T> Fetched<T> {
    pub fn new(value: T, meta: ResponseMeta) -> Self {
        Self { value, meta }
    }

    pub fn into_inner(self) -> T {
        self.value
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetched<U> {
        Fetched {
            value: f(self.value),
            meta: self.meta,
        }
    }
}

impl<T> From<T> for Fetched<T> {
    fn from(value: T) -> Self {
        Self {
            value,
            meta: ResponseMeta::default(),
        }
    }
}

/// Credentials attached as the `Authorization` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
    /// `Token <key>` for plain API keys.
    Token(String),
    /// `Bearer <token>` for OAuth2 access tokens.
    Bearer(String),
}

impl Auth {
    pub fn header_value(&self) -> String {
        match self {
            Auth::Token(t) => format!("Token {}", t),
            Auth::Bearer(t) => format!("Bearer {}", t),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub url: Url,
    pub method: Method,
    pub body: Option<String>,
    pub content_type: Option<String>,
}

impl RequestSpec {
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: Method::GET,
            body: None,
            content_type: None,
        }
    }

    pub fn with_body(mut self, method: Method, body: String, content_type: &str) -> Self {
        self.method = method;
        self.body = Some(body);
        self.content_type = Some(content_type.to_string());
        self
    }
}

#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
    auth: Option<Auth>,
}

impl HttpExecutor {
    pub fn new(client: reqwest::Client, limiter: Arc<RateLimiter>) -> Self {
        Self {
            client,
            limiter,
            auth: None,
        }
    }

    pub fn with_auth(mut self, auth: Option<Auth>) -> Self {
        self.auth = auth;
        self
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Issues `spec` once the limiter allows it and decodes the body as `T`.
    pub async fn execute<T>(&self, spec: RequestSpec) -> ApiResult<Fetched<T>>
    where
        T: DeserializeOwned,
    {
        self.limiter.execute_request(|| self.send(spec)).await
    }

    async fn send<T>(&self, spec: RequestSpec) -> ApiResult<Fetched<T>>
    where
        T: DeserializeOwned,
    {
        let mut url = spec.url;
        ensure_json_format(&mut url);
        debug!(method = %spec.method, url = %url, "dispatching request");

        let mut request = self
            .client
            .request(spec.method, url.clone())
            .header("Accept", "application/json");
        if let Some(auth) = &self.auth {
            request = request.header(AUTHORIZATION, auth.header_value());
        }
        if let Some(content_type) = spec.content_type {
            request = request.header(CONTENT_TYPE, content_type);
        }
        if let Some(body) = spec.body {
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        match status {
            200 | 201 | 202 => {
                let meta = ResponseMeta::from_headers(response.headers());
                let text = response.text().await?;
                let value = serde_json::from_str(&text)?;
                Ok(Fetched { value, meta })
            }
            429 => {
                let body = response.text().await.unwrap_or_default();
                warn!(url = %url, "provider rate limit hit");
                Err(ApiError::rate_limited(status, body))
            }
            _ => {
                let body = response.text().await.unwrap_or_default();
                debug!(status, url = %url, "request failed");
                Err(ApiError::Transport { status, body })
            }
        }
    }
}

/// Every call asks for JSON; cursor URLs usually already do.
fn ensure_json_format(url: &mut Url) {
    if !url.query_pairs().any(|(k, _)| k == "format") {
        url.query_pairs_mut().append_pair("format", "json");
    }
}
