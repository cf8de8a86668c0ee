use std::env;

use serde_json::{Map, Value};

mod config;
mod dryrun;
mod gemini;
mod provider;
mod requester;
#[cfg(test)]
mod test_support;
mod workspace;

pub use config::{parse_aspect_ratio, parse_timeout_seconds, EditorConfig};
pub use dryrun::DryrunProvider;
pub use gemini::GeminiProvider;
pub use provider::{
    default_provider_registry, EditRequest, ImageEditProvider, ImageEditProviderRegistry,
    ProviderEditResponse, ResponsePart,
};
pub use requester::{
    fold_response_parts, normalize_to_png, EditOutcome, EditRequester, NO_IMAGE_MESSAGE,
};
pub use workspace::{AppliedEdit, EditError, EditWorkspace};

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts.last().map(|existing| existing == trimmed).unwrap_or(false) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub(crate) fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::{error_chain_text, truncate_text};

    #[test]
    fn error_chain_text_preserves_nested_contexts() {
        let err = anyhow::anyhow!("socket closed")
            .context("Gemini request failed (https://example.test)")
            .context("image edit failed");
        let rendered = error_chain_text(&err, 400);
        assert_eq!(
            rendered,
            "image edit failed | caused by: Gemini request failed (https://example.test) | caused by: socket closed"
        );
    }

    #[test]
    fn truncate_text_marks_cut() {
        assert_eq!(truncate_text("abcdef", 3), "abc…");
        assert_eq!(truncate_text("abc", 3), "abc");
    }
}
