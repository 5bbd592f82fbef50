use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use url::Url;

use shared::error::extract_error_message;

use crate::{AuthError, Credential, TokenAcquirer};

/// Acquires tokens from a trusted issuing proxy: a bare POST with a JSON
/// content type, answered with the token body. The proxy decides scopes and
/// audience; this side only relays.
pub struct ProxyTokenAcquirer {
    http: Client,
    endpoint: Url,
    timeout: Option<Duration>,
}

#[derive(Debug, Deserialize)]
struct ProxyTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_on: Option<EpochSeconds>,
}

/// Issuers disagree on whether absolute expiry is a number or a string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EpochSeconds {
    Number(i64),
    Text(String),
}

impl EpochSeconds {
    fn seconds(&self) -> Option<i64> {
        match self {
            EpochSeconds::Number(value) => Some(*value),
            EpochSeconds::Text(raw) => raw.trim().parse().ok(),
        }
    }
}

impl ProxyTokenAcquirer {
    pub fn new(endpoint: Url) -> Self {
        Self {
            http: Client::new(),
            endpoint,
            timeout: None,
        }
    }

    /// Per-request timeout; none is imposed by default.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl TokenAcquirer for ProxyTokenAcquirer {
    async fn acquire(&self) -> Result<Credential, AuthError> {
        let mut request = self
            .http
            .post(self.endpoint.clone())
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|err| AuthError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            let message = extract_error_message(&body).unwrap_or_else(|| reason(status));
            return Err(AuthError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body: ProxyTokenResponse = response
            .json()
            .await
            .map_err(|err| AuthError::Malformed(err.to_string()))?;
        if body.access_token.is_empty() {
            return Err(AuthError::Malformed("empty access_token".into()));
        }
        Ok(credential_from_response(body, Utc::now()))
    }
}

/// Absolute `expires_on` wins over the relative `expires_in`; a token with
/// neither, or with an expiry outside the representable range, never
/// expires on our side.
fn credential_from_response(body: ProxyTokenResponse, now: DateTime<Utc>) -> Credential {
    let expires_at = body
        .expires_on
        .as_ref()
        .and_then(EpochSeconds::seconds)
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .or_else(|| {
            body.expires_in
                .and_then(chrono::Duration::try_seconds)
                .and_then(|ttl| now.checked_add_signed(ttl))
        });

    match expires_at {
        Some(expires_at) => Credential::with_expiry(body.access_token, expires_at),
        None => Credential::new(body.access_token),
    }
}

fn reason(status: StatusCode) -> String {
    status
        .canonical_reason()
        .unwrap_or("unknown status")
        .to_string()
}

#[cfg(test)]
#[path = "tests/proxy_tests.rs"]
mod tests;
