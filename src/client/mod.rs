//! Authenticated HTTP client with one-shot recovery from credential expiry

pub mod endpoints;
pub(crate) mod refresh;

use crate::core::error::ApiError;
use crate::session::credentials::CredentialStore;
use refresh::{Recovery, RefreshCoordinator};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use url::Url;

pub use endpoints::DashboardApi;

/// Re-issues allowed per call after a successful refresh.
const MAX_RETRIES_AFTER_REFRESH: u32 = 1;

/// Invoked once when the session cannot be recovered and has been cleared.
pub trait SessionExpiredHook: Send + Sync {
    fn on_session_expired(&self);
}

/// A request description that can be sent more than once.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<serde_json::Value>,
    authenticated: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            authenticated: true,
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

    pub fn query(mut self, name: &str, value: impl ToString) -> Self {
        self.query.push((name.to_string(), value.to_string()));
        self
    }

    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body).map_err(|e| ApiError::Decode(e.to_string()))?;
        self.body = Some(value);
        Ok(self)
    }

    /// Sends the request without credentials and without 401 recovery, for
    /// endpoints such as login where a 401 means bad input.
    pub fn unauthenticated(mut self) -> Self {
        self.authenticated = false;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_str(&self.body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    fn into_result(self) -> Result<Self, ApiError> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(ApiError::Http {
                status: self.status,
                body: self.body,
            })
        }
    }
}

pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
    credentials: Arc<CredentialStore>,
    refresh: RefreshCoordinator,
    hooks: Vec<Arc<dyn SessionExpiredHook>>,
}

impl ApiClient {
    pub fn new(base_url: &str, credentials: Arc<CredentialStore>) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .user_agent(concat!("pricecast/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            refresh: RefreshCoordinator::new(format!("{base_url}/auth/refresh")),
            base_url,
            http,
            credentials,
            hooks: Vec::new(),
        }
    }

    pub fn with_session_hook(mut self, hook: Arc<dyn SessionExpiredHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// Sends `request`, recovering once from an expired access token.
    ///
    /// A 401 triggers at most one refresh and one re-issue; the re-issued
    /// response is returned as-is, including a second 401.
    #[instrument(name = "ApiRequest", skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        if !request.authenticated {
            return self.send(request, None, 1).await?.into_result();
        }

        let mut token = self.credentials.access_token();
        let mut attempt = 1;
        loop {
            let response = self.send(request, token.as_deref(), attempt).await?;
            if response.status != StatusCode::UNAUTHORIZED || attempt > MAX_RETRIES_AFTER_REFRESH {
                return response.into_result();
            }

            match self
                .refresh
                .recover(&self.http, &self.credentials, token.as_deref())
                .await
            {
                Recovery::Retry(new_token) => token = Some(new_token),
                Recovery::Expired { cleared } => {
                    if cleared {
                        self.notify_session_expired();
                    }
                    return Err(ApiError::SessionExpired);
                }
            }
            attempt += 1;
        }
    }

    /// Executes and decodes a JSON response body.
    pub async fn fetch_json<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, ApiError> {
        self.execute(request).await?.json()
    }

    fn notify_session_expired(&self) {
        warn!("Session expired");
        for hook in &self.hooks {
            hook.on_session_expired();
        }
    }

    fn url_for(&self, request: &ApiRequest) -> Result<Url, ApiError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, request.path))
            .map_err(|e| ApiError::Network(format!("Invalid URL for {}: {e}", request.path)))?;
        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &request.query {
                pairs.append_pair(name, value);
            }
        }
        Ok(url)
    }

    async fn send(
        &self,
        request: &ApiRequest,
        token: Option<&str>,
        attempt: u32,
    ) -> Result<ApiResponse, ApiError> {
        let url = self.url_for(request)?;
        debug!(%url, attempt, authenticated = token.is_some(), "Sending request");

        let mut builder = self.http.request(request.method.clone(), url);
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(%status, attempt, "Received response");
        Ok(ApiResponse { status, body })
    }
}
