use std::time::Duration;

use crate::non_empty_env;

pub const DEFAULT_PROVIDER: &str = "gemini";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_ASPECT_RATIO: &str = "1:1";
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Settings for the edit requester and its transport.
///
/// Defaults come first, then environment variables, then whatever the caller
/// overrides on the returned value. The API key is not part of the config;
/// providers read it from the environment on every request.
#[derive(Debug, Clone, PartialEq)]
pub struct EditorConfig {
    pub provider: String,
    pub model: String,
    pub aspect_ratio: Option<String>,
    pub api_base: String,
    /// `None` leaves the HTTP client without a timeout.
    pub request_timeout: Option<Duration>,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER.to_string(),
            model: DEFAULT_MODEL.to_string(),
            aspect_ratio: Some(DEFAULT_ASPECT_RATIO.to_string()),
            api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            request_timeout: None,
        }
    }
}

impl EditorConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(non_empty_env)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(provider) = lookup("NANOEDIT_PROVIDER") {
            config.provider = provider.to_ascii_lowercase();
        }
        if let Some(model) = lookup("NANOEDIT_MODEL") {
            config.model = model;
        }
        if let Some(ratio) = lookup("NANOEDIT_ASPECT_RATIO") {
            config.aspect_ratio = parse_aspect_ratio(&ratio);
        }
        if let Some(base) = lookup("GEMINI_API_BASE") {
            config.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(raw) = lookup("NANOEDIT_REQUEST_TIMEOUT") {
            config.request_timeout = parse_timeout_seconds(&raw);
        }
        config
    }
}

/// `none`/`off`/`auto` disable the hint.
pub fn parse_aspect_ratio(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || matches!(
            trimmed.to_ascii_lowercase().as_str(),
            "none" | "off" | "auto"
        )
    {
        return None;
    }
    Some(trimmed.to_string())
}

/// Seconds as a positive number; anything else means no timeout.
pub fn parse_timeout_seconds(raw: &str) -> Option<Duration> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value > 0.0)
        .map(Duration::from_secs_f64)
}
