//! Session identity and login/logout transitions

pub mod credentials;

use crate::client::{DashboardApi, SessionExpiredHook};
use crate::core::cache::KeyValueCollection;
use crate::core::models::{LoginRequest, RegisterRequest, UserResponse};
use anyhow::{Context, Result, anyhow};
use credentials::{CredentialPair, CredentialStore};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Storage key holding the last known identity.
pub const IDENTITY_KEY: &str = "session:identity";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub id: i64,
    pub email: String,
    pub name: String,
}

impl From<UserResponse> for SessionIdentity {
    fn from(user: UserResponse) -> Self {
        let name = if user.name.trim().is_empty() {
            user.email.clone()
        } else {
            user.name
        };
        Self {
            id: user.id,
            email: user.email,
            name,
        }
    }
}

/// UI-facing session state over the credential store.
pub struct Session {
    credentials: Arc<CredentialStore>,
    storage: Arc<dyn KeyValueCollection>,
    identity: RwLock<Option<SessionIdentity>>,
}

impl Session {
    pub fn new(credentials: Arc<CredentialStore>, storage: Arc<dyn KeyValueCollection>) -> Self {
        let identity = storage
            .get(IDENTITY_KEY)
            .and_then(|raw| serde_json::from_str(&raw).ok());
        Self {
            credentials,
            storage,
            identity: RwLock::new(identity),
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// The signed-in user, if credentials are still held.
    pub fn identity(&self) -> Option<SessionIdentity> {
        if self.credentials.get().is_none() {
            return None;
        }
        match self.identity.read() {
            Ok(identity) => identity.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity().is_some()
    }

    pub fn set_identity(&self, identity: Option<SessionIdentity>) -> Result<()> {
        match &identity {
            Some(id) => self
                .storage
                .put(IDENTITY_KEY, &serde_json::to_string(id)?)?,
            None => self.storage.remove(IDENTITY_KEY)?,
        }
        let mut current = self
            .identity
            .write()
            .map_err(|_| anyhow!("Session lock poisoned"))?;
        *current = identity;
        Ok(())
    }

    pub fn login(&self, pair: CredentialPair, identity: SessionIdentity) -> Result<()> {
        self.credentials.set(pair)?;
        self.set_identity(Some(identity.clone()))?;
        info!(user = %identity.email, "Logged in");
        Ok(())
    }

    pub fn logout(&self) {
        self.credentials.clear();
        if let Err(e) = self.set_identity(None) {
            warn!(error = %e, "Failed to clear session identity");
        }
        info!("Logged out");
    }

    /// Password login: exchanges credentials for tokens, then loads the profile.
    pub async fn sign_in(
        &self,
        api: &DashboardApi,
        email: &str,
        password: &str,
    ) -> Result<SessionIdentity> {
        let tokens = api
            .login(&LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .await
            .context("Login failed")?;
        let refresh = tokens
            .refresh_token
            .context("Login response did not include a refresh token")?;

        self.complete_login(api, CredentialPair::new(tokens.access_token, refresh))
            .await
    }

    /// Creates an account and signs in with it.
    pub async fn sign_up(
        &self,
        api: &DashboardApi,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<SessionIdentity> {
        api.register(&RegisterRequest {
            email: email.to_string(),
            password: password.to_string(),
            name: name.to_string(),
        })
        .await
        .context("Registration failed")?;
        self.sign_in(api, email, password).await
    }

    /// Finishes a social login from the redirect fragment
    /// (`access_token=...&refresh_token=...`).
    pub async fn complete_oauth_callback(
        &self,
        api: &DashboardApi,
        fragment: &str,
    ) -> Result<SessionIdentity> {
        let pair = parse_callback_fragment(fragment)
            .context("Callback did not contain a complete credential pair")?;
        self.complete_login(api, pair).await
    }

    async fn complete_login(
        &self,
        api: &DashboardApi,
        pair: CredentialPair,
    ) -> Result<SessionIdentity> {
        // The profile lookup is authenticated with the new pair.
        self.credentials.set(pair.clone())?;
        match api.me().await {
            Ok(user) => {
                let identity = SessionIdentity::from(user);
                // Re-read: the lookup may have refreshed the access token.
                let pair = self.credentials.get().unwrap_or(pair);
                self.login(pair, identity.clone())?;
                Ok(identity)
            }
            Err(e) => {
                self.logout();
                Err(e).context("Failed to load user profile")
            }
        }
    }

    /// Replaces the stored identity with a freshly fetched `/auth/me` profile.
    pub fn remember_profile(&self, user: UserResponse) -> Result<SessionIdentity> {
        let identity = SessionIdentity::from(user);
        self.set_identity(Some(identity.clone()))?;
        Ok(identity)
    }
}

impl SessionExpiredHook for Session {
    fn on_session_expired(&self) {
        debug!("Dropping identity of expired session");
        if let Err(e) = self.set_identity(None) {
            warn!(error = %e, "Failed to clear session identity");
        }
    }
}

/// Extracts the credential pair from an OAuth redirect fragment.
pub fn parse_callback_fragment(fragment: &str) -> Option<CredentialPair> {
    let fragment = fragment
        .rsplit_once('#')
        .map_or(fragment, |(_, f)| f)
        .trim_start_matches('#');

    let mut access = None;
    let mut refresh = None;
    for (name, value) in url::form_urlencoded::parse(fragment.as_bytes()) {
        match name.as_ref() {
            "access_token" => access = Some(value.into_owned()),
            "refresh_token" => refresh = Some(value.into_owned()),
            _ => {}
        }
    }

    let pair = CredentialPair::new(access?, refresh?);
    pair.is_complete().then_some(pair)
}
