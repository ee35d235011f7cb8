use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

use super::retry::{decide, RetryDecision};
use crate::auth::TokenLifecycle;
use crate::config::ApiConfig;
use crate::error::SessionError;
use crate::models::TokenKind;
use crate::store::TokenStore;

/// Notified when an authenticated call could not be recovered. The stored
/// tokens are already gone when this runs; the handler owns the user-visible
/// consequences (session reset, navigation to the login page).
#[async_trait]
pub trait AuthFailureHandler: Send + Sync {
    async fn on_auth_failure(&self, reason: &SessionError);
}

/// A request description that can be sent more than once.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        ApiRequest {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Build the shared reqwest client used by both the interceptor chain and
/// the token lifecycle.
pub fn build_http_client(api: &ApiConfig) -> Result<reqwest::Client, SessionError> {
    reqwest::Client::builder()
        .timeout(Duration::from_millis(api.timeout_in_ms))
        .build()
        .map_err(|e| SessionError::Config(format!("could not build HTTP client: {}", e)))
}

/// HTTP client for the platform API. Attaches the stored bearer token,
/// refreshes and retries once on a 401, and escalates to the
/// [`AuthFailureHandler`] when that does not help.
pub struct ApiClient {
    http: reqwest::Client,
    api: ApiConfig,
    store: Arc<dyn TokenStore>,
    tokens: Arc<TokenLifecycle>,
    on_failure: Arc<dyn AuthFailureHandler>,
}

impl ApiClient {
    pub fn new(
        http: reqwest::Client,
        api: ApiConfig,
        store: Arc<dyn TokenStore>,
        tokens: Arc<TokenLifecycle>,
        on_failure: Arc<dyn AuthFailureHandler>,
    ) -> Self {
        ApiClient {
            http,
            api,
            store,
            tokens,
            on_failure,
        }
    }

    pub fn api_config(&self) -> &ApiConfig {
        &self.api
    }

    pub fn tokens(&self) -> &Arc<TokenLifecycle> {
        &self.tokens
    }

    /// Send `request`, applying the refresh-and-retry policy.
    pub async fn execute(&self, request: &ApiRequest) -> Result<reqwest::Response, SessionError> {
        let span = info_span!(
            "api_request",
            chain = %Uuid::new_v4(),
            method = %request.method,
            path = request.path.as_str(),
        );
        self.execute_chain(request).instrument(span).await
    }

    async fn execute_chain(&self, request: &ApiRequest) -> Result<reqwest::Response, SessionError> {
        // Best effort: whatever is stored right now, no refresh up front.
        let mut token = self.store.get(TokenKind::Access).await;
        let mut attempts = 0;

        loop {
            let response = self.dispatch(request, token.as_deref()).await?;
            let status = response.status();

            match decide(&self.api, &request.path, status, attempts) {
                RetryDecision::Deliver => return Ok(response),
                RetryDecision::PassThrough => return Err(status_error(response).await),
                RetryDecision::Surface => {
                    debug!("401 from an auth endpoint; not attempting recovery");
                    return Err(SessionError::Unauthorized);
                }
                RetryDecision::ForceLogin => {
                    warn!(
                        event_name = "api.unauthorized.after_retry",
                        event_domain = "auth",
                        "Request still unauthorized after refresh; ending session"
                    );
                    return Err(self.give_up(SessionError::Unauthorized).await);
                }
                RetryDecision::RefreshAndRetry => {
                    attempts += 1;
                    debug!("401 received; refreshing access token and retrying once");
                    match self.tokens.refresh().await {
                        Ok(fresh) => token = Some(fresh),
                        Err(e) => return Err(self.give_up(e).await),
                    }
                }
            }
        }
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        token: Option<&str>,
    ) -> Result<reqwest::Response, SessionError> {
        let mut builder = self
            .http
            .request(request.method.clone(), self.api.url(&request.path));
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        builder.send().await.map_err(SessionError::from)
    }

    async fn give_up(&self, reason: SessionError) -> SessionError {
        if let Err(e) = self.store.clear().await {
            warn!("Failed to clear stored tokens: {}", e);
        }
        self.on_failure.on_auth_failure(&reason).await;
        reason
    }

    /// Send `request` and decode the JSON body.
    pub async fn fetch<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, SessionError> {
        let response = self.execute(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| SessionError::Decode(e.to_string()))
    }

    /// Send `request` and discard the body.
    pub async fn send(&self, request: &ApiRequest) -> Result<(), SessionError> {
        self.execute(request).await.map(|_| ())
    }
}

async fn status_error(response: reqwest::Response) -> SessionError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    SessionError::Status { status, body }
}
