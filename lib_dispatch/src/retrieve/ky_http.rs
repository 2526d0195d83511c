//! # HTTP Retrieval Utilities
//!
//! An asynchronous API client wrapper around `reqwest`, with middleware
//! support for exponential backoff retries on transient failures
//! (connection errors, timeouts, 5xx, 429) and Bearer authentication
//! sourced from a shared [`TokenStore`].
//!
//! Non-success statuses are not errors at this layer: they come back as an
//! [`ApiResponse`] with `success == false`, so callers can react to
//! specific codes (404 for an empty queue, 401 for an expired token).

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::RwLock;
use url::Url;

use crate::gateway::GatewayError;
use crate::models::TokenPair;

/// Shared holder of the current access and refresh tokens.
///
/// Every in-flight request reads it; refreshes replace the pair in place.
#[derive(Debug, Default)]
pub struct TokenStore {
    tokens: RwLock<Option<TokenPair>>,
}

impl TokenStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current access token, if any.
    pub async fn bearer(&self) -> Option<String> {
        self.tokens
            .read()
            .await
            .as_ref()
            .map(|pair| pair.token.clone())
            .filter(|token| !token.is_empty())
    }

    /// Current refresh token, if any.
    pub async fn refresh_token(&self) -> Option<String> {
        self.tokens
            .read()
            .await
            .as_ref()
            .map(|pair| pair.refresh_token.clone())
            .filter(|token| !token.is_empty())
    }

    /// Replaces the stored pair.
    pub async fn set(&self, pair: TokenPair) {
        *self.tokens.write().await = Some(pair);
    }

    /// Forgets both tokens.
    pub async fn clear(&self) {
        *self.tokens.write().await = None;
    }
}

/// A standardized container for API responses.
#[derive(Debug)]
pub struct ApiResponse {
    /// Relative path the request was sent to.
    pub path: String,
    /// The raw response body.
    pub body: String,
    /// The numeric HTTP status code.
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
    /// The headers returned by the server.
    pub headers: HeaderMap,
}

impl ApiResponse {
    /// Turns a non-success status into [`GatewayError::Status`].
    pub fn ensure_success(&self) -> Result<(), GatewayError> {
        if self.success {
            Ok(())
        } else {
            Err(GatewayError::Status { status: self.status, body: self.body.clone() })
        }
    }

    /// Deserializes the body, reporting parse failures as [`GatewayError::Decode`].
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, GatewayError> {
        serde_json::from_str(&self.body).map_err(|e| GatewayError::Decode {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }
}

/// A resendable request description.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: Option<String>,
    authenticated: bool,
}

impl ApiRequest {
    /// An authenticated request.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
            authenticated: true,
        }
    }

    /// Authenticated GET.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Authenticated POST.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Appends a query parameter. Values are percent-encoded when sent.
    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    /// Adds a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Serializes `body` as the JSON payload.
    pub fn json<B: Serialize>(mut self, body: &B) -> Result<Self, GatewayError> {
        let encoded = serde_json::to_string(body).map_err(|e| GatewayError::InvalidArgument(e.to_string()))?;
        self.body = Some(encoded);
        Ok(self)
    }

    /// Sends the request without a Bearer token (login and refresh).
    pub fn anonymous(mut self) -> Self {
        self.authenticated = false;
        self
    }

    /// Relative path of the request.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the request carries the Bearer token.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }
}

/// Transport settings for [`ApiClient`].
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// `User-Agent` header value.
    pub user_agent: String,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Retries for transient failures.
    pub max_retries: u32,
    /// Shortest backoff between retries.
    pub retry_min_delay: Duration,
    /// Longest backoff between retries.
    pub retry_max_delay: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            user_agent: "Emergency Dispatcher".to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 7,
            retry_min_delay: Duration::from_millis(2),
            retry_max_delay: Duration::from_millis(1000),
        }
    }
}

/// A flexible asynchronous HTTP client.
///
/// Built on top of `reqwest_middleware`, it handles the base URL,
/// authentication tokens, and automatic retries.
pub struct ApiClient {
    /// The underlying middleware-enabled client.
    inner: ClientWithMiddleware,
    /// The base URL to which all relative paths are joined.
    base_url: Url,
    /// Tokens injected into authenticated requests.
    tokens: Arc<TokenStore>,
}

impl ApiClient {
    /// Creates a new `ApiClient` with a retry policy.
    ///
    /// A missing trailing slash on `base_url` is added so relative paths
    /// join below it rather than replacing its last segment.
    pub fn new(base_url: &str, settings: &ClientSettings, tokens: Arc<TokenStore>) -> Result<Self, GatewayError> {
        let mut normalized = base_url.trim().to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let url = Url::parse(&normalized)
            .map_err(|e| GatewayError::InvalidArgument(format!("invalid base URL '{}': {}", base_url, e)))?;

        let min_delay = settings.retry_min_delay.min(settings.retry_max_delay);
        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(min_delay, settings.retry_max_delay)
            .build_with_max_retries(settings.max_retries);

        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let client = ClientBuilder::new(http)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self { inner: client, base_url: url, tokens })
    }

    /// The shared token store.
    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    /// The normalized base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Sends `request` and captures the response.
    ///
    /// Only transport failures that outlived the retry policy are errors;
    /// every HTTP status comes back as an [`ApiResponse`].
    pub async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, GatewayError> {
        let mut url = self
            .base_url
            .join(&request.path)
            .map_err(|e| GatewayError::InvalidArgument(format!("invalid path '{}': {}", request.path, e)))?;
        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &request.query {
                pairs.append_pair(key, value);
            }
        }

        let mut req = self
            .inner
            .request(request.method.clone(), url)
            .header(ACCEPT, "application/json")
            .headers(request.headers.clone());

        if request.authenticated {
            if let Some(token) = self.tokens.bearer().await {
                req = req.header(AUTHORIZATION, format!("Bearer {}", token));
            }
        }

        if let Some(body) = &request.body {
            req = req.header(CONTENT_TYPE, "application/json").body(body.clone());
        }

        let response = req.send().await.map_err(|e| GatewayError::Transport(e.to_string()))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(ApiResponse {
            path: request.path.clone(),
            body,
            status: status.as_u16(),
            success: status.is_success(),
            headers,
        })
    }
}
