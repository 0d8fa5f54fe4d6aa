//! Tensor to image decoding.

use half::f16;
use image::{DynamicImage, RgbImage};

use crate::calibration::{LatentCalibration, ModelFamily};
use crate::encode::encode_png;
use crate::error::{CodecError, CodecResult};
use crate::header::{HEADER_LEN, TensorHeader};

/// Neutral gray used for non-finite RGB samples.
const NEUTRAL_GRAY: u8 = 127;

/// Decode a wire tensor into an 8-bit RGB image.
///
/// 3 channel tensors are final RGB output. 4 and 16 channel tensors are
/// latent previews and go through the calibration table of `family`, or the
/// default family for that channel count when `family` is `None` or does not
/// match the tensor.
pub fn decode(bytes: &[u8], family: Option<ModelFamily>) -> CodecResult<RgbImage> {
    let header = TensorHeader::parse(bytes)?;

    let expected = header
        .total_len()
        .ok_or_else(|| CodecError::InvalidData("tensor shape overflows".into()))?;
    if bytes.len() < expected {
        return Err(CodecError::InvalidData(format!(
            "payload is {} bytes, header declares {}",
            bytes.len(),
            expected
        )));
    }

    let values: Vec<f32> = bytes[HEADER_LEN..expected]
        .chunks_exact(2)
        .map(|c| f16::from_le_bytes([c[0], c[1]]).to_f32())
        .collect();

    let rgb = match header.channels {
        3 => values.iter().map(|v| rgb_byte(*v)).collect(),
        4 | 16 => project_latent(&values, calibration_for(header.channels, family)?),
        other => {
            return Err(CodecError::ConversionFailed(format!(
                "unsupported channel count {other} (expected 3, 4 or 16)"
            )));
        }
    };

    RgbImage::from_raw(header.width, header.height, rgb).ok_or_else(|| {
        CodecError::ConversionFailed("pixel buffer does not match dimensions".into())
    })
}

/// Decode a wire tensor and store it as PNG.
pub fn decode_to_png(bytes: &[u8], family: Option<ModelFamily>) -> CodecResult<Vec<u8>> {
    encode_png(&DynamicImage::ImageRgb8(decode(bytes, family)?))
}

fn calibration_for(
    channels: u32,
    family: Option<ModelFamily>,
) -> CodecResult<&'static LatentCalibration> {
    let fallback = ModelFamily::default_for_channels(channels).ok_or_else(|| {
        CodecError::ConversionFailed(format!("no latent calibration for {channels} channels"))
    })?;

    let family = match family {
        Some(family) if family.latent_channels() == channels => family,
        Some(family) => {
            tracing::debug!(
                %family,
                channels,
                fallback = %fallback,
                "Model family does not match tensor channels"
            );
            fallback
        }
        None => fallback,
    };

    Ok(family.calibration())
}

fn project_latent(values: &[f32], calibration: &LatentCalibration) -> Vec<u8> {
    let channels = calibration.channels();
    let mut out = Vec::with_capacity(values.len() / channels * 3);
    for latent in values.chunks_exact(channels) {
        out.extend(calibration.project(latent).map(latent_byte));
    }
    out
}

fn rgb_byte(value: f32) -> u8 {
    if value.is_finite() {
        to_byte(value)
    } else {
        NEUTRAL_GRAY
    }
}

fn latent_byte(value: f32) -> u8 {
    if value.is_finite() { to_byte(value) } else { 0 }
}

/// Map `[-1, 1]` back onto `0..=255`.
fn to_byte(value: f32) -> u8 {
    ((value + 1.0) * 127.5).round().clamp(0.0, 255.0) as u8
}
