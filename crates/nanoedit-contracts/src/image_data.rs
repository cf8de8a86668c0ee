use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const DEFAULT_IMAGE_MIME: &str = "image/png";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageDataError {
    #[error("image payload is empty")]
    Empty,
    #[error("inline image data is not valid base64: {0}")]
    InvalidBase64(String),
}

/// Encoded image bytes plus the MIME type they were declared or sniffed as.
///
/// The bytes are kept exactly as received; nothing here decodes pixels.
#[derive(Clone, PartialEq, Eq)]
pub struct ImagePayload {
    bytes: Vec<u8>,
    mime_type: String,
}

impl ImagePayload {
    pub fn new(bytes: impl Into<Vec<u8>>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Wraps raw bytes, sniffing the container from magic numbers.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        let mime_type = sniff_mime(&bytes).unwrap_or(DEFAULT_IMAGE_MIME).to_string();
        Self { bytes, mime_type }
    }

    /// Accepts either a `data:<mime>;base64,<payload>` URI or a bare base64
    /// payload.
    pub fn from_inline(raw: &str) -> Result<Self, ImageDataError> {
        let (declared_mime, payload) = split_data_uri(raw);
        let payload = payload.trim();
        if payload.is_empty() {
            return Err(ImageDataError::Empty);
        }
        let bytes = BASE64
            .decode(payload.as_bytes())
            .map_err(|err| ImageDataError::InvalidBase64(err.to_string()))?;
        if bytes.is_empty() {
            return Err(ImageDataError::Empty);
        }
        let mime_type = declared_mime
            .map(str::to_string)
            .or_else(|| sniff_mime(&bytes).map(str::to_string))
            .unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string());
        Ok(Self { bytes, mime_type })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Short hex SHA-256 prefix used to identify a payload in logs.
    pub fn digest(&self) -> String {
        let digest = Sha256::digest(&self.bytes);
        hex::encode(&digest[..6])
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }

    pub fn file_extension(&self) -> &'static str {
        extension_for_mime(&self.mime_type)
    }
}

impl fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImagePayload")
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .field("digest", &self.digest())
            .finish()
    }
}

/// Splits a data URI into its declared MIME type and payload. Input without
/// a `data:` header is returned whole as the payload.
pub fn split_data_uri(raw: &str) -> (Option<&str>, &str) {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("data:") else {
        return (None, trimmed);
    };
    let Some((header, payload)) = rest.split_once(',') else {
        return (None, trimmed);
    };
    let mime = header
        .split(';')
        .next()
        .map(str::trim)
        .filter(|value| !value.is_empty());
    (mime, payload)
}

pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("image/png");
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    None
}

pub fn extension_for_mime(mime: &str) -> &'static str {
    let lowered = mime.trim().to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        return "jpg";
    }
    if lowered.contains("webp") {
        return "webp";
    }
    if lowered.contains("gif") {
        return "gif";
    }
    "png"
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];

    #[test]
    fn from_inline_strips_data_uri_prefix() -> anyhow::Result<()> {
        let uri = format!("data:image/jpeg;base64,{}", BASE64.encode(b"jpeg-ish"));
        let payload = ImagePayload::from_inline(&uri)?;
        assert_eq!(payload.bytes(), b"jpeg-ish");
        assert_eq!(payload.mime_type(), "image/jpeg");
        Ok(())
    }

    #[test]
    fn from_inline_accepts_bare_base64_and_sniffs_mime() -> anyhow::Result<()> {
        let bare = BASE64.encode(PNG_MAGIC);
        let payload = ImagePayload::from_inline(&bare)?;
        assert_eq!(payload.bytes(), PNG_MAGIC);
        assert_eq!(payload.mime_type(), "image/png");
        Ok(())
    }

    #[test]
    fn from_inline_rejects_empty_and_garbage() {
        assert_eq!(
            ImagePayload::from_inline("data:image/png;base64,"),
            Err(ImageDataError::Empty)
        );
        assert!(matches!(
            ImagePayload::from_inline("not base64 at all!"),
            Err(ImageDataError::InvalidBase64(_))
        ));
    }

    #[test]
    fn data_uri_renders_declared_mime() {
        let payload = ImagePayload::new(b"abc".to_vec(), "image/webp");
        assert_eq!(payload.to_data_uri(), "data:image/webp;base64,YWJj");
        assert_eq!(payload.file_extension(), "webp");
    }

    #[test]
    fn split_data_uri_leaves_plain_text_whole() {
        assert_eq!(split_data_uri("  YWJj "), (None, "YWJj"));
        assert_eq!(
            split_data_uri("data:image/gif;base64,R0lG"),
            (Some("image/gif"), "R0lG")
        );
    }

    #[test]
    fn debug_output_does_not_dump_bytes() {
        let payload = ImagePayload::from_bytes(vec![7u8; 4096]);
        let rendered = format!("{payload:?}");
        assert!(rendered.contains("len: 4096"));
        assert!(rendered.len() < 200);
        assert_eq!(payload.digest().len(), 12);
    }
}
