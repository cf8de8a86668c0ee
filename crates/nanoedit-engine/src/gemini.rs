use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use nanoedit_contracts::image_data::{sniff_mime, ImagePayload, DEFAULT_IMAGE_MIME};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};

use crate::config::EditorConfig;
use crate::provider::{EditRequest, ImageEditProvider, ProviderEditResponse, ResponsePart};
use crate::{non_empty_env, truncate_text};

const API_KEY_ENV_VARS: &[&str] = &["GEMINI_API_KEY", "GOOGLE_API_KEY", "API_KEY"];

/// Gemini `generateContent` image editing over REST.
pub struct GeminiProvider {
    api_base: String,
    api_key: Option<String>,
    key_lookup: fn(&str) -> Option<String>,
    http: HttpClient,
}

impl GeminiProvider {
    pub fn new(config: &EditorConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build Gemini HTTP client")?;
        Ok(Self {
            api_base: config.api_base.trim().trim_end_matches('/').to_string(),
            api_key: None,
            key_lookup: non_empty_env,
            http,
        })
    }

    /// Pins a credential instead of reading the environment per request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Replaces the environment lookup used to find a credential at call time.
    pub fn with_key_lookup(mut self, lookup: fn(&str) -> Option<String>) -> Self {
        self.key_lookup = lookup;
        self
    }

    fn api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| API_KEY_ENV_VARS.iter().find_map(|key| (self.key_lookup)(key)))
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn build_payload(request: &EditRequest) -> Value {
        let mut generation_config = Map::new();
        generation_config.insert(
            "responseModalities".to_string(),
            json!(["TEXT", "IMAGE"]),
        );
        if let Some(aspect_ratio) = request
            .aspect_ratio
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            generation_config.insert(
                "imageConfig".to_string(),
                json!({ "aspectRatio": aspect_ratio }),
            );
        }

        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {
                        "inlineData": {
                            "mimeType": request.image.mime_type(),
                            "data": request.image.to_base64(),
                        }
                    },
                    { "text": request.prompt },
                ],
            }],
            "generationConfig": Value::Object(generation_config),
        })
    }

    /// Reads the first candidate's parts in order. Parts that are neither
    /// inline data nor text (function calls, empty text) are skipped.
    fn extract_parts(response_payload: &Value) -> Result<Vec<ResponsePart>> {
        let parts = response_payload
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|candidates| candidates.first())
            .and_then(|candidate| candidate.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut out = Vec::new();
        for part in parts {
            if let Some(inline) = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
            {
                let data = inline
                    .get("data")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if data.is_empty() {
                    continue;
                }
                let bytes = BASE64
                    .decode(data.as_bytes())
                    .context("Gemini image base64 decode failed")?;
                let mime_type = inline
                    .get("mimeType")
                    .or_else(|| inline.get("mime_type"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| sniff_mime(&bytes).map(str::to_string))
                    .unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string());
                out.push(ResponsePart::Image(ImagePayload::new(bytes, mime_type)));
                continue;
            }
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                if !text.is_empty() {
                    out.push(ResponsePart::Text(text.to_string()));
                }
            }
        }
        Ok(out)
    }

    fn block_reason(response_payload: &Value) -> Option<String> {
        response_payload
            .get("promptFeedback")
            .and_then(|feedback| feedback.get("blockReason"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

impl ImageEditProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn edit(&self, request: &EditRequest) -> Result<ProviderEditResponse> {
        let Some(api_key) = self.api_key() else {
            bail!("GEMINI_API_KEY, GOOGLE_API_KEY or API_KEY not set");
        };
        let endpoint = self.endpoint_for_model(&request.model);
        let payload = Self::build_payload(request);

        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key.as_str())])
            .json(&payload)
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        let response_payload = response_json_or_error("Gemini", response)?;
        let parts = Self::extract_parts(&response_payload)?;

        Ok(ProviderEditResponse {
            block_reason: Self::block_reason(&response_payload),
            parts,
        })
    }
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!("{provider} request failed ({code}): {}", error_detail(&body));
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

/// Prefers the API's own `error.message` over the raw body.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|parsed| {
            parsed
                .get("error")
                .and_then(|error| error.get("message"))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|message| !message.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| truncate_text(body.trim(), 512))
}
