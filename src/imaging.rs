//! Decoding uploads and encoding results for transport

use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, RgbImage};
use std::fmt::Debug;

/// JPEG quality when none is configured, matching the usual PIL default
pub const DEFAULT_JPEG_QUALITY: u8 = 75;

/// Decode any supported image format into 8-bit RGB
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory(bytes).context("upload is not a readable image")?;
    Ok(image.to_rgb8())
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode(
        image.as_raw(),
        image.width(),
        image.height(),
        ColorType::Rgb8,
    )?;
    Ok(buf)
}

/// A base 64 JPEG image
#[derive(Clone)]
pub struct B64Image {
    pub image: String,
    pub height: u32,
    pub width: u32,
}

impl Debug for B64Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "B64Image {{ img: <{} chars>, height: {}, width: {} }}",
            self.image.len(),
            self.height,
            self.width
        )
    }
}

impl B64Image {
    pub fn from_rgb(image: &RgbImage, quality: u8) -> Result<Self> {
        let jpeg = encode_jpeg(image, quality)?;
        Ok(B64Image {
            image: general_purpose::STANDARD.encode(jpeg),
            height: image.height(),
            width: image.width(),
        })
    }

    /// The raw JPEG bytes
    pub fn decode(&self) -> Result<Vec<u8>> {
        Ok(general_purpose::STANDARD.decode(&self.image)?)
    }
}
