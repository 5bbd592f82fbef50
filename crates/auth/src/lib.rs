use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

mod proxy;

pub use proxy::ProxyTokenAcquirer;

/// Tokens this close to expiry count as expired already.
const TOKEN_REFRESH_SKEW_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    Proxy,
    Interactive,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token request failed: {0}")]
    Transport(String),
    #[error("token endpoint returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("malformed token response: {0}")]
    Malformed(String),
    #[error("no token acquirer configured")]
    Unavailable,
}

/// A bearer token plus the instant it stops being usable; `None` means the
/// issuer did not say.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    access_token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at: None,
        }
    }

    pub fn with_expiry(access_token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at: Some(expires_at),
        }
    }

    pub fn token(&self) -> &str {
        &self.access_token
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now + Duration::seconds(TOKEN_REFRESH_SKEW_SECS) >= expires_at,
            None => false,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[async_trait]
pub trait TokenAcquirer: Send + Sync {
    async fn acquire(&self) -> Result<Credential, AuthError>;
}

pub struct MissingTokenAcquirer;

#[async_trait]
impl TokenAcquirer for MissingTokenAcquirer {
    async fn acquire(&self) -> Result<Credential, AuthError> {
        Err(AuthError::Unavailable)
    }
}

pub struct StaticTokenAcquirer {
    credential: Credential,
}

impl StaticTokenAcquirer {
    pub fn new(credential: Credential) -> Self {
        Self { credential }
    }
}

#[async_trait]
impl TokenAcquirer for StaticTokenAcquirer {
    async fn acquire(&self) -> Result<Credential, AuthError> {
        Ok(self.credential.clone())
    }
}

/// Clones share the slot, so every provider built over one store reuses a
/// single token.
#[derive(Clone, Default)]
pub struct SessionTokenStore {
    slot: Arc<Mutex<Option<Credential>>>,
}

impl SessionTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn clear(&self) {
        self.slot.lock().await.take();
    }

    async fn lock(&self) -> MutexGuard<'_, Option<Credential>> {
        self.slot.lock().await
    }
}

#[derive(Clone)]
pub struct CredentialProvider {
    acquirer: Arc<dyn TokenAcquirer>,
    store: SessionTokenStore,
}

impl CredentialProvider {
    pub fn new(acquirer: Arc<dyn TokenAcquirer>) -> Self {
        Self::with_store(acquirer, SessionTokenStore::new())
    }

    pub fn with_store(acquirer: Arc<dyn TokenAcquirer>, store: SessionTokenStore) -> Self {
        Self { acquirer, store }
    }

    /// Cached credential, or a fresh one when the slot is empty or expired.
    /// The slot lock is held across acquisition, so concurrent callers queue
    /// behind the in-flight attempt and pick up its result.
    pub async fn get_token(&self) -> Result<Credential, AuthError> {
        let mut slot = self.store.lock().await;

        if let Some(credential) = slot.as_ref() {
            if !credential.is_expired(Utc::now()) {
                debug!("auth: reusing cached token");
                return Ok(credential.clone());
            }
            debug!("auth: cached token expired");
            slot.take();
        }

        match self.acquirer.acquire().await {
            Ok(credential) => {
                info!(
                    has_expiry = credential.expires_at.is_some(),
                    "auth: token acquired"
                );
                *slot = Some(credential.clone());
                Ok(credential)
            }
            Err(err) => {
                warn!("auth: token acquisition failed: {err}");
                Err(err)
            }
        }
    }

    pub async fn invalidate(&self) {
        self.store.clear().await;
        debug!("auth: cached token invalidated");
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
