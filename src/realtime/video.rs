use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{codecs::jpeg::JpegEncoder, ExtendedColorType};

pub const DEFAULT_JPEG_QUALITY: u8 = 70;

/// One decoded camera frame, tightly packed RGB8.
#[derive(Debug, Clone, PartialEq)]
pub struct RgbFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

pub fn encode_jpeg_data_url(frame: &RgbFrame, quality: u8) -> Result<String> {
    let expected = frame.width as usize * frame.height as usize * 3;
    if frame.width == 0 || frame.height == 0 || frame.pixels.len() != expected {
        bail!(
            "frame buffer holds {} bytes, expected {} for {}x{} RGB",
            frame.pixels.len(),
            expected,
            frame.width,
            frame.height
        );
    }

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100))
        .encode(&frame.pixels, frame.width, frame.height, ExtendedColorType::Rgb8)
        .context("failed to encode frame as JPEG")?;

    Ok(format!("data:image/jpeg;base64,{}", STANDARD.encode(jpeg)))
}

/// Splits a `data:<mime>;base64,<payload>` URL into its content type and bytes.
pub fn decode_data_url(data_url: &str) -> Option<(String, Vec<u8>)> {
    let rest = data_url.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    let mime = meta.strip_suffix(";base64")?;
    let mime = if mime.is_empty() {
        "application/octet-stream"
    } else {
        mime
    };

    let bytes = STANDARD.decode(payload.trim()).ok()?;
    Some((mime.to_string(), bytes))
}
