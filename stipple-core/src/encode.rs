use std::io::Cursor;

use anyhow::{Context, Result};
use base64::{prelude::BASE64_STANDARD, Engine};
use image::DynamicImage;

/// Serializes an image to PNG and base64-encodes the bytes.
pub fn image_to_base64_png(img: &DynamicImage) -> Result<String> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .context("failed to encode image as png")?;
    Ok(BASE64_STANDARD.encode(&bytes))
}

pub fn images_to_base64(images: &[DynamicImage]) -> Result<Vec<String>> {
    images.iter().map(image_to_base64_png).collect()
}
