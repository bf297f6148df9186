//! Persisted access/refresh credential pair

use crate::core::cache::KeyValueCollection;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

/// Storage key holding the serialized pair.
pub const CREDENTIALS_KEY: &str = "session:credentials";

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    /// Both tokens present and non-blank.
    pub fn is_complete(&self) -> bool {
        !self.access_token.trim().is_empty() && !self.refresh_token.trim().is_empty()
    }
}

impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Record layout on disk. Fields are optional so that a truncated or
/// hand-edited record parses and is then rejected as incomplete.
#[derive(Deserialize)]
struct StoredCredentials {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

/// Process-wide holder of the credential pair.
///
/// The in-memory copy and the durable record are updated under one write
/// lock; readers never observe one token from the old pair and one from the
/// new.
pub struct CredentialStore {
    storage: Arc<dyn KeyValueCollection>,
    current: RwLock<Option<CredentialPair>>,
}

impl CredentialStore {
    /// Creates the store and loads any pair persisted by a previous run.
    pub fn new(storage: Arc<dyn KeyValueCollection>) -> Self {
        let current = Self::load(storage.as_ref());
        Self {
            storage,
            current: RwLock::new(current),
        }
    }

    fn load(storage: &dyn KeyValueCollection) -> Option<CredentialPair> {
        let raw = storage.get(CREDENTIALS_KEY)?;
        let stored: StoredCredentials = match serde_json::from_str(&raw) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable credential record");
                return None;
            }
        };
        match (stored.access_token, stored.refresh_token) {
            (Some(access), Some(refresh)) => {
                let pair = CredentialPair::new(access, refresh);
                pair.is_complete().then_some(pair)
            }
            _ => {
                debug!("Ignoring partial credential record");
                None
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<CredentialPair>> {
        match self.current.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<CredentialPair>> {
        match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn get(&self) -> Option<CredentialPair> {
        self.read().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.read().as_ref().map(|p| p.access_token.clone())
    }

    /// Replaces the pair. An incomplete pair clears the store instead.
    pub fn set(&self, pair: CredentialPair) -> Result<()> {
        if !pair.is_complete() {
            debug!("Refusing to store incomplete credential pair");
            self.clear();
            return Err(anyhow!("Incomplete credential pair"));
        }

        let mut current = self.write();
        self.storage
            .put(CREDENTIALS_KEY, &serde_json::to_string(&pair)?)?;
        *current = Some(pair);
        debug!("Stored credential pair");
        Ok(())
    }

    /// Swaps in a refreshed access token, keeping the current refresh token
    /// unless the server rotated it.
    pub fn update_access(
        &self,
        access_token: String,
        rotated_refresh: Option<String>,
    ) -> Result<CredentialPair> {
        let mut current = self.write();
        let refresh_token = match rotated_refresh.filter(|t| !t.trim().is_empty()) {
            Some(token) => token,
            None => current
                .as_ref()
                .map(|p| p.refresh_token.clone())
                .ok_or_else(|| anyhow!("No refresh token to keep"))?,
        };

        let pair = CredentialPair::new(access_token, refresh_token);
        if !pair.is_complete() {
            return Err(anyhow!("Incomplete credential pair"));
        }
        self.storage
            .put(CREDENTIALS_KEY, &serde_json::to_string(&pair)?)?;
        *current = Some(pair.clone());
        debug!("Updated access token");
        Ok(pair)
    }

    /// Removes both tokens. Safe to call when already empty.
    pub fn clear(&self) {
        let mut current = self.write();
        if let Err(e) = self.storage.remove(CREDENTIALS_KEY) {
            warn!(error = %e, "Failed to remove persisted credentials");
        }
        *current = None;
        debug!("Cleared credential pair");
    }
}
