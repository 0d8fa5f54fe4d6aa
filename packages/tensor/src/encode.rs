//! Image to tensor encoding.

use std::io::Cursor;

use half::f16;
use image::{DynamicImage, ImageFormat};

use crate::error::{CodecError, CodecResult};
use crate::header::{HEADER_LEN, TensorHeader};

/// Decode `image_bytes` (PNG, JPEG, WebP) and encode it as a wire tensor.
///
/// Fails with [`CodecError::InvalidImage`] when the bytes are not a raster
/// image the `image` crate understands.
pub fn encode(image_bytes: &[u8], force_rgb: bool) -> CodecResult<Vec<u8>> {
    let image = image::load_from_memory(image_bytes)
        .map_err(|e| CodecError::InvalidImage(e.to_string()))?;
    Ok(encode_image(&image, force_rgb))
}

/// Encode an already decoded image as a wire tensor.
///
/// The tensor has 4 channels only when the image has transparency and
/// `force_rgb` is false; otherwise alpha is dropped and 3 channels are written.
pub fn encode_image(image: &DynamicImage, force_rgb: bool) -> Vec<u8> {
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();

    let has_transparency = !force_rgb && rgba.pixels().any(|p| p[3] < u8::MAX);
    let channels: usize = if has_transparency { 4 } else { 3 };

    let header = TensorHeader::new(height, width, channels as u32);
    let pixel_count = width as usize * height as usize;
    let mut out = Vec::with_capacity(HEADER_LEN + pixel_count * channels * 2);
    out.extend_from_slice(&header.to_bytes());

    for pixel in rgba.pixels() {
        for &value in &pixel.0[..channels] {
            out.extend_from_slice(&normalize(value).to_le_bytes());
        }
    }

    out
}

/// Encode an image as PNG, the lossless raster format used for masks and
/// stored results.
pub fn encode_png(image: &DynamicImage) -> CodecResult<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| CodecError::ConversionFailed(format!("png encoding failed: {e}")))?;
    Ok(buf.into_inner())
}

/// Rasterize arbitrary image bytes and re-encode them as PNG.
pub fn reencode_png(image_bytes: &[u8]) -> CodecResult<Vec<u8>> {
    let image = image::load_from_memory(image_bytes)
        .map_err(|e| CodecError::InvalidImage(e.to_string()))?;
    encode_png(&image)
}

/// Map `0..=255` onto `[-1, 1]`.
fn normalize(value: u8) -> f16 {
    f16::from_f32(f32::from(value) / 255.0 * 2.0 - 1.0)
}
