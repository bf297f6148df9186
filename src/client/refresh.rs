//! Single-flight credential refresh

use crate::core::models::{RefreshRequest, TokenResponse};
use crate::session::credentials::CredentialStore;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// What a request that was rejected with 401 should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Recovery {
    /// Re-issue the original request with this access token.
    Retry(String),
    /// The session is gone. `cleared` is true when this caller cleared it and
    /// owns the session-expired side effect.
    Expired { cleared: bool },
}

/// Serializes refresh calls so concurrent 401s share one refresh.
///
/// Each caller reports the access token its request was sent with. Once it
/// holds the lock it re-reads the store: a different token means another
/// caller already refreshed (or the user logged in again), an empty store
/// means an earlier refresh failed. Only a caller whose token is still
/// current talks to the refresh endpoint.
pub(crate) struct RefreshCoordinator {
    lock: Mutex<()>,
    refresh_url: String,
}

impl RefreshCoordinator {
    pub(crate) fn new(refresh_url: String) -> Self {
        Self {
            lock: Mutex::new(()),
            refresh_url,
        }
    }

    pub(crate) async fn recover(
        &self,
        http: &reqwest::Client,
        credentials: &CredentialStore,
        sent_with: Option<&str>,
    ) -> Recovery {
        let _guard = self.lock.lock().await;

        let pair = match credentials.get() {
            Some(pair) => pair,
            None if sent_with.is_some() => {
                debug!("Session cleared while waiting for refresh");
                return Recovery::Expired { cleared: false };
            }
            None => {
                warn!("Request rejected and no refresh token available");
                credentials.clear();
                return Recovery::Expired { cleared: true };
            }
        };

        if sent_with != Some(pair.access_token.as_str()) {
            debug!("Credential already refreshed, retrying with current token");
            return Recovery::Retry(pair.access_token);
        }

        match self.call_refresh(http, &pair.refresh_token).await {
            Ok(token) => match credentials.update_access(token.access_token, token.refresh_token)
            {
                Ok(updated) => {
                    info!("Access token refreshed");
                    Recovery::Retry(updated.access_token)
                }
                Err(e) => {
                    warn!(error = %e, "Failed to store refreshed credentials");
                    credentials.clear();
                    Recovery::Expired { cleared: true }
                }
            },
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                credentials.clear();
                Recovery::Expired { cleared: true }
            }
        }
    }

    async fn call_refresh(
        &self,
        http: &reqwest::Client,
        refresh_token: &str,
    ) -> anyhow::Result<TokenResponse> {
        debug!("Requesting token refresh from {}", self.refresh_url);
        let response = http
            .post(&self.refresh_url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Refresh rejected with status {}",
                response.status()
            ));
        }

        let token = response.json::<TokenResponse>().await?;
        Ok(token)
    }
}
