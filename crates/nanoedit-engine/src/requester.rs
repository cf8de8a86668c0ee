use std::io::Cursor;
use std::sync::Arc;

use anyhow::{Context, Result};
use image::ImageFormat;
use nanoedit_contracts::image_data::{sniff_mime, ImagePayload};

use crate::config::EditorConfig;
use crate::provider::{default_provider_registry, EditRequest, ImageEditProvider, ResponsePart};
use crate::error_chain_text;

pub const NO_IMAGE_MESSAGE: &str = "No image was generated. The model might have returned only text.";

const FAILURE_MESSAGE_MAX_CHARS: usize = 800;

/// Uniform result of one edit exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    Success {
        image: ImagePayload,
        commentary: String,
    },
    Failure {
        message: String,
        commentary: Option<String>,
    },
}

impl EditOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, EditOutcome::Success { .. })
    }

    fn failure(message: impl Into<String>) -> Self {
        EditOutcome::Failure {
            message: message.into(),
            commentary: None,
        }
    }
}

/// Performs one stateless exchange per call with a single provider.
#[derive(Clone)]
pub struct EditRequester {
    provider: Arc<dyn ImageEditProvider>,
    model: String,
    aspect_ratio: Option<String>,
}

impl EditRequester {
    pub fn new(
        provider: Arc<dyn ImageEditProvider>,
        model: impl Into<String>,
        aspect_ratio: Option<String>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            aspect_ratio,
        }
    }

    pub fn from_config(config: &EditorConfig) -> Result<Self> {
        let registry = default_provider_registry(config)?;
        let provider = registry.get(&config.provider).with_context(|| {
            format!(
                "unknown provider '{}' (available: {})",
                config.provider,
                registry.names().join(", ")
            )
        })?;
        Ok(Self::new(
            provider,
            config.model.clone(),
            config.aspect_ratio.clone(),
        ))
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Never retries and never touches session state; every way the exchange
    /// can go wrong comes back as `Failure`.
    pub fn request_edit(&self, current: &ImagePayload, prompt: &str) -> EditOutcome {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return EditOutcome::failure("Edit prompt is empty.");
        }
        if current.is_empty() {
            return EditOutcome::failure("Current image is empty.");
        }

        let request = EditRequest {
            image: current.clone(),
            prompt: prompt.to_string(),
            model: self.model.clone(),
            aspect_ratio: self.aspect_ratio.clone(),
        };
        match self.provider.edit(&request) {
            Ok(response) => fold_response_parts(response.parts, response.block_reason),
            Err(err) => EditOutcome::failure(error_chain_text(&err, FAILURE_MESSAGE_MAX_CHARS)),
        }
    }

    /// Same as [`EditRequester::request_edit`] for an image held as a data URI
    /// or bare base64 string.
    pub fn request_edit_inline(&self, current: &str, prompt: &str) -> EditOutcome {
        match ImagePayload::from_inline(current) {
            Ok(image) => self.request_edit(&image, prompt),
            Err(err) => EditOutcome::failure(format!("Current image is unreadable: {err}")),
        }
    }
}

/// Folds response parts into an outcome. Text concatenates in order; when
/// several images arrive the last one wins.
pub fn fold_response_parts(parts: Vec<ResponsePart>, block_reason: Option<String>) -> EditOutcome {
    let mut image = None;
    let mut commentary = String::new();
    for part in parts {
        match part {
            ResponsePart::Image(payload) => image = Some(payload),
            ResponsePart::Text(text) => commentary.push_str(&text),
        }
    }

    let Some(image) = image else {
        let mut message = NO_IMAGE_MESSAGE.to_string();
        if let Some(reason) = block_reason.filter(|value| !value.trim().is_empty()) {
            message.push_str(&format!(" Prompt blocked: {reason}."));
        }
        return EditOutcome::Failure {
            message,
            commentary: Some(commentary).filter(|text| !text.trim().is_empty()),
        };
    };

    match normalize_to_png(image) {
        Ok(image) => EditOutcome::Success { image, commentary },
        Err(err) => EditOutcome::Failure {
            message: error_chain_text(&err, FAILURE_MESSAGE_MAX_CHARS),
            commentary: Some(commentary).filter(|text| !text.trim().is_empty()),
        },
    }
}

/// Decodes every image; valid PNG keeps its bytes, anything else is
/// re-encoded.
pub fn normalize_to_png(image: ImagePayload) -> Result<ImagePayload> {
    let decoded = image::load_from_memory(image.bytes()).with_context(|| {
        format!(
            "generated image could not be decoded ({}, {} bytes)",
            image.mime_type(),
            image.len()
        )
    })?;
    if sniff_mime(image.bytes()) == Some("image/png") {
        return Ok(ImagePayload::new(image.into_bytes(), "image/png"));
    }
    let mut out = Cursor::new(Vec::new());
    decoded
        .write_to(&mut out, ImageFormat::Png)
        .context("generated image PNG encode failed")?;
    Ok(ImagePayload::new(out.into_inner(), "image/png"))
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::*;
    use crate::test_support::{png, ScriptedProvider};

    fn requester(provider: Arc<ScriptedProvider>) -> EditRequester {
        EditRequester::new(provider, "gemini-2.5-flash-image", Some("1:1".to_string()))
    }

    #[test]
    fn image_and_text_parts_fold_into_success() {
        let provider = ScriptedProvider::new(vec![Ok(vec![
            ResponsePart::Text("Added ".to_string()),
            ResponsePart::Image(png(9)),
            ResponsePart::Text("snow.".to_string()),
        ])]);
        let outcome = requester(provider.clone()).request_edit(&png(1), "  add snow ");

        assert_eq!(
            outcome,
            EditOutcome::Success {
                image: png(9),
                commentary: "Added snow.".to_string(),
            }
        );
        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].prompt, "add snow");
        assert_eq!(seen[0].image, png(1));
        assert_eq!(seen[0].aspect_ratio.as_deref(), Some("1:1"));
    }

    #[test]
    fn text_only_response_is_a_failure_with_commentary() {
        let provider = ScriptedProvider::new(vec![Ok(vec![ResponsePart::Text(
            "I can't edit that.".to_string(),
        )])]);
        let outcome = requester(provider).request_edit(&png(1), "remove the person");
        assert_eq!(
            outcome,
            EditOutcome::Failure {
                message: NO_IMAGE_MESSAGE.to_string(),
                commentary: Some("I can't edit that.".to_string()),
            }
        );
    }

    #[test]
    fn provider_error_becomes_failure_message() {
        let provider = ScriptedProvider::new(vec![
            Err("Gemini request failed (403): API key not valid.".to_string()),
        ]);
        let outcome = requester(provider.clone()).request_edit(&png(1), "add snow");
        assert_eq!(
            outcome,
            EditOutcome::Failure {
                message: "Gemini request failed (403): API key not valid.".to_string(),
                commentary: None,
            }
        );
        assert_eq!(provider.calls(), 1);
    }

    #[test]
    fn blank_prompt_fails_without_calling_provider() {
        let provider = ScriptedProvider::new(Vec::new());
        let outcome = requester(provider.clone()).request_edit(&png(1), "   ");
        assert!(!outcome.is_success());
        assert_eq!(provider.calls(), 0);
    }

    #[test]
    fn last_image_part_wins() {
        let outcome = fold_response_parts(
            vec![ResponsePart::Image(png(3)), ResponsePart::Image(png(4))],
            None,
        );
        assert_eq!(
            outcome,
            EditOutcome::Success {
                image: png(4),
                commentary: String::new(),
            }
        );
    }

    #[test]
    fn block_reason_is_appended_to_no_image_message() {
        let outcome = fold_response_parts(Vec::new(), Some("SAFETY".to_string()));
        let EditOutcome::Failure { message, commentary } = outcome else {
            panic!("expected failure");
        };
        assert_eq!(message, format!("{NO_IMAGE_MESSAGE} Prompt blocked: SAFETY."));
        assert_eq!(commentary, None);
    }

    #[test]
    fn non_png_output_is_normalized() -> anyhow::Result<()> {
        let image = RgbImage::from_pixel(3, 2, Rgb([40, 80, 120]));
        let mut jpeg = Cursor::new(Vec::new());
        image.write_to(&mut jpeg, ImageFormat::Jpeg)?;
        let jpeg = ImagePayload::new(jpeg.into_inner(), "image/jpeg");

        let normalized = normalize_to_png(jpeg)?;
        assert_eq!(normalized.mime_type(), "image/png");
        assert_eq!(sniff_mime(normalized.bytes()), Some("image/png"));
        let decoded = image::load_from_memory(normalized.bytes())?;
        assert_eq!((decoded.width(), decoded.height()), (3, 2));
        Ok(())
    }

    #[test]
    fn mislabelled_png_keeps_bytes_and_fixes_mime() -> anyhow::Result<()> {
        let original = png(5);
        let labelled = ImagePayload::new(original.bytes().to_vec(), "image/webp");
        let normalized = normalize_to_png(labelled)?;
        assert_eq!(normalized, original);
        Ok(())
    }

    #[test]
    fn undecodable_image_part_is_a_failure() {
        let outcome = fold_response_parts(
            vec![
                ResponsePart::Image(ImagePayload::new(b"garbage".to_vec(), "image/jpeg")),
                ResponsePart::Text("done".to_string()),
            ],
            None,
        );
        let EditOutcome::Failure { message, commentary } = outcome else {
            panic!("expected failure");
        };
        assert!(message.starts_with("generated image could not be decoded"));
        assert_eq!(commentary.as_deref(), Some("done"));
    }

    #[test]
    fn truncated_png_part_is_a_failure() {
        let mut bytes = png(9).into_bytes();
        bytes.truncate(12);
        let outcome = fold_response_parts(
            vec![ResponsePart::Image(ImagePayload::new(bytes, "image/png"))],
            None,
        );
        let EditOutcome::Failure { message, commentary } = outcome else {
            panic!("expected failure");
        };
        assert!(message.starts_with("generated image could not be decoded (image/png, 12 bytes)"));
        assert_eq!(commentary, None);
    }

    #[test]
    fn inline_input_accepts_prefixed_and_bare_forms() {
        let provider = ScriptedProvider::new(vec![
            Ok(vec![ResponsePart::Image(png(7))]),
            Ok(vec![ResponsePart::Image(png(8))]),
        ]);
        let requester = requester(provider.clone());

        assert!(requester
            .request_edit_inline(&png(1).to_data_uri(), "one")
            .is_success());
        assert!(requester
            .request_edit_inline(&png(1).to_base64(), "two")
            .is_success());
        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen[0].image, png(1));
        assert_eq!(seen[1].image.bytes(), png(1).bytes());

        assert!(!requester.request_edit_inline("%%%", "three").is_success());
    }

    #[test]
    fn from_config_rejects_unknown_provider() {
        let config = EditorConfig {
            provider: "midjourney".to_string(),
            ..EditorConfig::default()
        };
        let err = EditRequester::from_config(&config).err().map(|err| err.to_string());
        assert_eq!(
            err.as_deref(),
            Some("unknown provider 'midjourney' (available: dryrun, gemini)")
        );
    }
}
