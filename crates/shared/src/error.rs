use serde::Deserialize;

/// Error body shape used by the data endpoint,
/// `{"error":{"code":...,"message":...}}`, plus the bare top-level `message`
/// some token proxies answer with.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(default)]
    pub error: Option<ErrorDetail>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Best-effort extraction of a human-readable message from a non-2xx body.
pub fn extract_error_message(body: &[u8]) -> Option<String> {
    let envelope: ErrorEnvelope = serde_json::from_slice(body).ok()?;
    if let Some(detail) = envelope.error {
        if let Some(message) = detail.message.filter(|m| !m.is_empty()) {
            return Some(message);
        }
        if let Some(code) = detail.code.filter(|c| !c.is_empty()) {
            return Some(code);
        }
    }
    envelope.message.filter(|m| !m.is_empty())
}
