use std::io::Cursor;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use image::{ImageFormat, Rgb, RgbImage};
use nanoedit_contracts::image_data::ImagePayload;

use crate::provider::{EditRequest, ImageEditProvider, ProviderEditResponse, ResponsePart};

/// Replays canned replies in order and records every request it sees.
pub(crate) struct ScriptedProvider {
    replies: Mutex<Vec<Result<Vec<ResponsePart>, String>>>,
    pub(crate) seen: Mutex<Vec<EditRequest>>,
}

impl ScriptedProvider {
    pub(crate) fn new(replies: Vec<Result<Vec<ResponsePart>, String>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

impl ImageEditProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn edit(&self, request: &EditRequest) -> Result<ProviderEditResponse> {
        self.seen.lock().unwrap().push(request.clone());
        let mut replies = self.replies.lock().unwrap();
        if replies.is_empty() {
            bail!("scripted provider has no reply left");
        }
        match replies.remove(0) {
            Ok(parts) => Ok(ProviderEditResponse {
                parts,
                block_reason: None,
            }),
            Err(message) => bail!(message),
        }
    }
}

/// Tiny solid-grey PNG; different shades give different bytes.
pub(crate) fn png(shade: u8) -> ImagePayload {
    let image = RgbImage::from_pixel(2, 2, Rgb([shade, shade, shade]));
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png).unwrap();
    ImagePayload::new(out.into_inner(), "image/png")
}
