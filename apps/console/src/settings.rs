use std::fs;

use serde::Deserialize;
use tracing::warn;

use auth::AuthMode;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub base_url: String,
    pub parent_entity: String,
    pub child_entity: String,
    pub filter_field: String,
    pub auth_mode: AuthMode,
    pub token_endpoint: Option<String>,
    pub request_timeout_ms: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/api/data".into(),
            parent_entity: "parents".into(),
            child_entity: "children".into(),
            filter_field: "parentRef".into(),
            auth_mode: AuthMode::Proxy,
            token_endpoint: Some("http://127.0.0.1:8080/api/token".into()),
            request_timeout_ms: Some(10_000),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    base_url: Option<String>,
    parent_entity: Option<String>,
    child_entity: Option<String>,
    filter_field: Option<String>,
    auth_mode: Option<AuthMode>,
    token_endpoint: Option<String>,
    request_timeout_ms: Option<u64>,
}

pub fn load_settings(path: &str) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        apply_file_settings(&mut settings, &raw);
    }
    apply_env_overrides(&mut settings);

    settings
}

fn apply_file_settings(settings: &mut Settings, raw: &str) {
    let file_cfg = match toml::from_str::<FileSettings>(raw) {
        Ok(file_cfg) => file_cfg,
        Err(err) => {
            warn!("console: ignoring unreadable settings file: {err}");
            return;
        }
    };

    if let Some(v) = file_cfg.base_url {
        settings.base_url = v;
    }
    if let Some(v) = file_cfg.parent_entity {
        settings.parent_entity = v;
    }
    if let Some(v) = file_cfg.child_entity {
        settings.child_entity = v;
    }
    if let Some(v) = file_cfg.filter_field {
        settings.filter_field = v;
    }
    if let Some(v) = file_cfg.auth_mode {
        settings.auth_mode = v;
    }
    if let Some(v) = file_cfg.token_endpoint {
        settings.token_endpoint = Some(v);
    }
    if let Some(v) = file_cfg.request_timeout_ms {
        settings.request_timeout_ms = Some(v);
    }
}

fn apply_env_overrides(settings: &mut Settings) {
    if let Ok(v) = std::env::var("PICKER__BASE_URL") {
        settings.base_url = v;
    }
    if let Ok(v) = std::env::var("PICKER__PARENT_ENTITY") {
        settings.parent_entity = v;
    }
    if let Ok(v) = std::env::var("PICKER__CHILD_ENTITY") {
        settings.child_entity = v;
    }
    if let Ok(v) = std::env::var("PICKER__FILTER_FIELD") {
        settings.filter_field = v;
    }
    if let Ok(v) = std::env::var("PICKER__AUTH_MODE") {
        match v.as_str() {
            "proxy" => settings.auth_mode = AuthMode::Proxy,
            "interactive" => settings.auth_mode = AuthMode::Interactive,
            other => warn!("console: unknown auth mode '{other}', keeping configured value"),
        }
    }
    if let Ok(v) = std::env::var("PICKER__TOKEN_ENDPOINT") {
        settings.token_endpoint = Some(v);
    }
    if let Ok(v) = std::env::var("PICKER__REQUEST_TIMEOUT_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.request_timeout_ms = Some(parsed);
        }
    }
}
