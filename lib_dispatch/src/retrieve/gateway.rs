//! # HTTP Coordinator Gateway
//!
//! [`HttpGateway`] implements [`ResourceGateway`] against the coordinator's
//! REST API. On top of the transport retries of [`ApiClient`] it adds:
//!
//! - login, and a bounded refresh-and-resend on HTTP 401;
//! - re-fetching of malformed payloads with linear backoff;
//! - validation of availability data, which is never retried.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use reqwest::header::{HeaderName, HeaderValue};
use tokio::sync::Mutex;

use crate::gateway::{GatewayError, NextCall, ResourceGateway};
use crate::models::{Availability, Call, City, DispatchCommand, LoginRequest, RunStatus, ServiceKind, TokenPair};
use crate::retrieve::ky_http::{ApiClient, ApiRequest, ApiResponse, ClientSettings, TokenStore};

/// Relative paths of the coordinator API.
pub mod paths {
    /// Login with user name and password.
    pub const LOGIN: &str = "auth/login";
    /// Token refresh.
    pub const REFRESH: &str = "auth/refresh";
    /// Next pending call.
    pub const CALL_NEXT: &str = "calls/next";
    /// Every queued call.
    pub const CALL_QUEUE: &str = "calls/queue";
    /// Run reset.
    pub const CONTROL_RESET: &str = "control/reset";
    /// Run stop.
    pub const CONTROL_STOP: &str = "control/stop";
    /// Run status.
    pub const CONTROL_STATUS: &str = "control/status";
    /// Location catalog.
    pub const LOCATIONS: &str = "locations";

    use crate::models::ServiceKind;

    /// Full availability snapshot of one kind.
    pub fn search(kind: ServiceKind) -> String {
        format!("{}/search", kind)
    }

    /// Availability of one kind at one location.
    pub fn search_by_city(kind: ServiceKind) -> String {
        format!("{}/searchbycity", kind)
    }

    /// Dispatch commit of one kind.
    pub fn dispatch(kind: ServiceKind) -> String {
        format!("{}/dispatch", kind)
    }
}

const REFRESH_TOKEN_HEADER: &str = "refresh_token";

/// Connection and resilience settings of [`HttpGateway`].
#[derive(Debug, Clone)]
pub struct HttpGatewayConfig {
    /// Coordinator root URL.
    pub base_url: String,
    /// Login user name.
    pub username: String,
    /// Login password.
    pub password: String,
    /// Transport settings, including the transient retry policy.
    pub client: ClientSettings,
    /// Token refreshes attempted per operation after a 401.
    pub auth_refresh_attempts: u32,
    /// Fetches of an operation whose payload does not parse.
    pub decode_attempts: u32,
    /// Base of the linear backoff between those fetches.
    pub decode_backoff: Duration,
}

impl Default for HttpGatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/".to_string(),
            username: "distancify".to_string(),
            password: "hackathon".to_string(),
            client: ClientSettings::default(),
            auth_refresh_attempts: 1,
            decode_attempts: 3,
            decode_backoff: Duration::from_millis(50),
        }
    }
}

/// REST implementation of [`ResourceGateway`].
pub struct HttpGateway {
    client: ApiClient,
    username: String,
    password: String,
    auth_refresh_attempts: u32,
    decode_attempts: u32,
    decode_backoff: Duration,
    /// Serializes token renewal across concurrent operations.
    refresh_lock: Mutex<()>,
}

impl HttpGateway {
    /// Builds the gateway. No request is sent until the first operation.
    pub fn new(config: HttpGatewayConfig) -> Result<Self, GatewayError> {
        let tokens = Arc::new(TokenStore::new());
        let client = ApiClient::new(&config.base_url, &config.client, tokens)?;
        Ok(Self {
            client,
            username: config.username,
            password: config.password,
            auth_refresh_attempts: config.auth_refresh_attempts,
            decode_attempts: config.decode_attempts.max(1),
            decode_backoff: config.decode_backoff,
            refresh_lock: Mutex::new(()),
        })
    }

    /// The token store shared by every request.
    pub fn tokens(&self) -> &Arc<TokenStore> {
        self.client.tokens()
    }

    /// The normalized coordinator root URL.
    pub fn base_url(&self) -> &url::Url {
        self.client.base_url()
    }

    async fn login(&self) -> Result<(), GatewayError> {
        let request = ApiRequest::post(paths::LOGIN)
            .anonymous()
            .json(&LoginRequest { user_name: self.username.clone(), password: self.password.clone() })?;
        let pair = self.fetch_tokens(&request).await?;
        self.tokens().set(pair).await;
        info!("Logged in as '{}'", self.username);
        Ok(())
    }

    /// Renews the tokens, falling back to a full login when no refresh
    /// token is held.
    async fn refresh(&self) -> Result<(), GatewayError> {
        let Some(refresh_token) = self.tokens().refresh_token().await else {
            debug!("No refresh token held, logging in again");
            return self.login().await;
        };
        let value = HeaderValue::from_str(&refresh_token)
            .map_err(|e| GatewayError::InvalidArgument(format!("refresh token is not a valid header value: {}", e)))?;
        let request = ApiRequest::post(paths::REFRESH)
            .anonymous()
            .header(HeaderName::from_static(REFRESH_TOKEN_HEADER), value);
        let pair = self.fetch_tokens(&request).await?;
        self.tokens().set(pair).await;
        debug!("Access token refreshed");
        Ok(())
    }

    /// Sends `request`, refreshing credentials and resending on 401 at most
    /// `auth_refresh_attempts` times.
    ///
    /// Only one refresh runs at a time. An operation that was rejected with
    /// a token some other operation has since renewed just resends.
    async fn send_authorized(&self, request: &ApiRequest) -> Result<ApiResponse, GatewayError> {
        let mut refreshes = 0;
        loop {
            let sent_with = self.tokens().bearer().await;
            let response = self.client.send(request).await?;
            if response.status != 401 || !request.is_authenticated() {
                return Ok(response);
            }
            if refreshes >= self.auth_refresh_attempts {
                return Err(GatewayError::Unauthorized { attempts: refreshes });
            }
            refreshes += 1;

            let _renewing = self.refresh_lock.lock().await;
            if self.tokens().bearer().await != sent_with {
                debug!("Token already renewed, resending {}", request.path());
                continue;
            }
            warn!(
                "Unauthorized on {}, refreshing token ({}/{})",
                request.path(),
                refreshes,
                self.auth_refresh_attempts
            );
            if let Err(e) = self.refresh().await {
                error!("Token refresh failed: {}", e);
            }
        }
    }

    /// Sends `request` and decodes the response. A [`GatewayError::Decode`]
    /// from `decode` re-fetches after a linearly growing pause; every other
    /// outcome is returned as is.
    async fn fetch<T, F>(&self, request: &ApiRequest, decode: F) -> Result<T, GatewayError>
    where
        F: Fn(&ApiResponse) -> Result<T, GatewayError>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let response = self.send_authorized(request).await?;
            let outcome = decode(&response);
            match self.refetch_delay(&outcome, attempt) {
                Some(delay) => tokio::time::sleep(delay).await,
                None => return outcome,
            }
        }
    }

    /// Login and refresh. Goes straight to the client, so a rejected
    /// refresh never triggers another refresh.
    async fn fetch_tokens(&self, request: &ApiRequest) -> Result<TokenPair, GatewayError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let response = self.client.send(request).await?;
            let outcome = decode_tokens(&response);
            match self.refetch_delay(&outcome, attempt) {
                Some(delay) => tokio::time::sleep(delay).await,
                None => return outcome,
            }
        }
    }

    fn refetch_delay<T>(&self, outcome: &Result<T, GatewayError>, attempt: u32) -> Option<Duration> {
        match outcome {
            Err(GatewayError::Decode { path, reason }) if attempt < self.decode_attempts => {
                warn!(
                    "Malformed payload from {} (attempt {}/{}): {}",
                    path, attempt, self.decode_attempts, reason
                );
                Some(self.decode_backoff * attempt)
            }
            _ => None,
        }
    }
}

fn decode_json<T: serde::de::DeserializeOwned>(response: &ApiResponse) -> Result<T, GatewayError> {
    response.ensure_success()?;
    response.json()
}

fn decode_tokens(response: &ApiResponse) -> Result<TokenPair, GatewayError> {
    let pair: TokenPair = decode_json(response)?;
    if pair.token.is_empty() {
        return Err(GatewayError::Validation("login response carried no token".to_string()));
    }
    Ok(pair)
}

fn decode_next_call(response: &ApiResponse) -> Result<NextCall, GatewayError> {
    if response.status == 404 {
        return Ok(NextCall::Empty);
    }
    decode_json(response).map(NextCall::Call)
}

/// Parses the plain-integer body of an availability check.
fn decode_quantity(response: &ApiResponse) -> Result<i64, GatewayError> {
    response.ensure_success()?;
    let text = response.body.trim();
    let quantity: i64 = text.parse().map_err(|e: std::num::ParseIntError| GatewayError::Decode {
        path: response.path.clone(),
        reason: format!("expected an integer, got '{}': {}", text, e),
    })?;
    if quantity < 0 {
        return Err(GatewayError::Validation(format!(
            "negative availability {} from {}",
            quantity, response.path
        )));
    }
    Ok(quantity)
}

fn decode_availability(response: &ApiResponse) -> Result<Vec<Availability>, GatewayError> {
    let entries: Vec<Availability> = decode_json(response)?;
    for entry in &entries {
        entry
            .validate()
            .map_err(|reason| GatewayError::Validation(format!("{} ({})", reason, entry.key())))?;
    }
    Ok(entries)
}

fn require_non_empty(name: &str, value: &str) -> Result<(), GatewayError> {
    if value.trim().is_empty() {
        return Err(GatewayError::InvalidArgument(format!("{} must not be empty", name)));
    }
    Ok(())
}

#[async_trait]
impl ResourceGateway for HttpGateway {
    async fn authenticate(&self) -> Result<(), GatewayError> {
        self.login().await
    }

    async fn clear_credentials(&self) {
        self.tokens().clear().await;
        debug!("Credentials cleared");
    }

    async fn next_call(&self) -> Result<NextCall, GatewayError> {
        self.fetch(&ApiRequest::get(paths::CALL_NEXT), decode_next_call).await
    }

    async fn call_queue(&self) -> Result<Vec<Call>, GatewayError> {
        self.fetch(&ApiRequest::get(paths::CALL_QUEUE), decode_json).await
    }

    async fn check_availability(&self, kind: ServiceKind, county: &str, city: &str) -> Result<i64, GatewayError> {
        require_non_empty("county", county)?;
        require_non_empty("city", city)?;
        let request = ApiRequest::get(paths::search_by_city(kind))
            .query("county", county)
            .query("city", city);
        self.fetch(&request, decode_quantity).await
    }

    async fn commit_dispatch(&self, command: &DispatchCommand) -> Result<(), GatewayError> {
        command.validate().map_err(GatewayError::InvalidArgument)?;
        let request = ApiRequest::post(paths::dispatch(command.kind)).json(command)?;
        let response = self.send_authorized(&request).await?;
        response.ensure_success()
    }

    async fn locations(&self) -> Result<Vec<City>, GatewayError> {
        self.fetch(&ApiRequest::get(paths::LOCATIONS), decode_json).await
    }

    async fn service_availability(&self, kind: ServiceKind) -> Result<Vec<Availability>, GatewayError> {
        self.fetch(&ApiRequest::get(paths::search(kind)), decode_availability).await
    }

    async fn reset_run(&self, seed: &str, target_dispatches: u32, max_active_calls: u32) -> Result<RunStatus, GatewayError> {
        let request = ApiRequest::post(paths::CONTROL_RESET)
            .query("seed", seed)
            .query("targetDispatches", target_dispatches)
            .query("maxActiveCalls", max_active_calls);
        self.fetch(&request, decode_json).await
    }

    async fn stop_run(&self) -> Result<RunStatus, GatewayError> {
        self.fetch(&ApiRequest::post(paths::CONTROL_STOP), decode_json).await
    }

    async fn run_status(&self) -> Result<RunStatus, GatewayError> {
        self.fetch(&ApiRequest::get(paths::CONTROL_STATUS), decode_json).await
    }
}
