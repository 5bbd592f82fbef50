use std::fmt;
use std::time::Duration;

use reqwest::{header, Client, StatusCode};
use thiserror::Error;
use tracing::debug;
use url::Url;

use auth::Credential;
use shared::{
    domain::RecordId,
    error::extract_error_message,
    protocol::{CollectionResponse, Record},
};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("collection request failed: {0}")]
    Transport(String),
    #[error("data endpoint returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("malformed collection response: {0}")]
    Decode(String),
}

impl FetchError {
    /// HTTP status when the endpoint answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Server-side filter, rendered as an OData `$filter` qualifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterExpr {
    field: String,
    value: String,
}

impl FilterExpr {
    /// `<field> eq '<value>'`, the only predicate the cascade needs.
    pub fn eq(field: impl Into<String>, value: &RecordId) -> Self {
        Self {
            field: field.into(),
            value: value.as_str().to_string(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Single quotes double inside OData string literals.
        write!(f, "{} eq '{}'", self.field, self.value.replace('\'', "''"))
    }
}

/// Read-only client for the collection endpoints. One instance per base URL;
/// the underlying connection pool is shared across fetches.
pub struct CollectionFetcher {
    http: Client,
    base: Url,
    timeout: Option<Duration>,
}

impl CollectionFetcher {
    pub fn new(mut base: Url) -> Self {
        // Url::join drops the last path segment unless the base ends in '/'.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self {
            http: Client::new(),
            base,
            timeout: None,
        }
    }

    /// Per-request timeout; none is imposed by default.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Authenticated GET of one entity collection, optionally filtered. An
    /// empty or absent `value` array is an empty collection, not an error.
    pub async fn fetch(
        &self,
        entity: &str,
        filter: Option<&FilterExpr>,
        credential: &Credential,
    ) -> Result<Vec<Record>, FetchError> {
        let url = self
            .base
            .join(entity)
            .map_err(|err| FetchError::Transport(format!("invalid entity url: {err}")))?;

        let mut request = self
            .http
            .get(url)
            .bearer_auth(credential.token())
            .header(header::ACCEPT, "application/json");
        if let Some(filter) = filter {
            request = request.query(&[("$filter", filter.to_string())]);
        }
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|err| FetchError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            let message = extract_error_message(&body).unwrap_or_else(|| reason(status));
            debug!(entity, status = status.as_u16(), "webapi: fetch rejected");
            return Err(FetchError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body: CollectionResponse = response
            .json()
            .await
            .map_err(|err| FetchError::Decode(err.to_string()))?;
        debug!(entity, records = body.value.len(), "webapi: collection fetched");
        Ok(body.value)
    }
}

fn reason(status: StatusCode) -> String {
    status
        .canonical_reason()
        .unwrap_or("unknown status")
        .to_string()
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
