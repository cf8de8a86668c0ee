use std::io::Cursor;

use anyhow::{Context, Result};
use image::{ImageFormat, Rgba};
use nanoedit_contracts::image_data::ImagePayload;
use sha2::{Digest, Sha256};

use crate::provider::{EditRequest, ImageEditProvider, ProviderEditResponse, ResponsePart};

/// Offline provider: blends the input toward a colour derived from the
/// prompt. Same image and prompt always give the same output.
pub struct DryrunProvider;

impl ImageEditProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn edit(&self, request: &EditRequest) -> Result<ProviderEditResponse> {
        let decoded = image::load_from_memory(request.image.bytes())
            .context("dryrun could not decode the input image")?;
        let (r, g, b) = color_from_prompt(&request.prompt);
        let mut canvas = decoded.to_rgba8();
        for pixel in canvas.pixels_mut() {
            let Rgba([pr, pg, pb, pa]) = *pixel;
            *pixel = Rgba([blend(pr, r), blend(pg, g), blend(pb, b), pa]);
        }

        let mut encoded = Cursor::new(Vec::new());
        canvas
            .write_to(&mut encoded, ImageFormat::Png)
            .context("dryrun PNG encode failed")?;
        let tint = format!("#{r:02x}{g:02x}{b:02x}");

        Ok(ProviderEditResponse {
            parts: vec![
                ResponsePart::Image(ImagePayload::new(encoded.into_inner(), "image/png")),
                ResponsePart::Text(format!("Dryrun tint {tint} applied.")),
            ],
            block_reason: None,
        })
    }
}

fn blend(channel: u8, tint: u8) -> u8 {
    ((u16::from(channel) + u16::from(tint)) / 2) as u8
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let digest = Sha256::digest(prompt.trim().as_bytes());
    (digest[0], digest[1], digest[2])
}
