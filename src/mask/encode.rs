use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{ImageFormat, RgbaImage};
use std::io::Cursor;

const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// Encode an image as a `data:image/png;base64,...` URL
pub fn to_png_data_url(image: &RgbaImage) -> Result<String, image::ImageError> {
    let mut png = Vec::new();
    image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(format!("{PNG_DATA_URL_PREFIX}{}", STANDARD.encode(png)))
}

/// Decode a base64 image data URL (any format the `image` crate reads)
pub fn decode_data_url(url: &str) -> Result<RgbaImage> {
    let Some((header, payload)) = url.split_once(',') else {
        bail!("Not a data URL");
    };
    if !header.starts_with("data:image/") || !header.ends_with(";base64") {
        bail!("Unsupported data URL header '{header}'");
    }

    let bytes = STANDARD
        .decode(payload.trim())
        .context("Invalid base64 in data URL")?;
    let image = image::load_from_memory(&bytes).context("Failed to decode data URL image")?;
    Ok(image.to_rgba8())
}
