use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use super::{CaptureError, Frame};

/// Encode an RGB8 frame as baseline JPEG.
pub fn encode(frame: &Frame, quality: u8) -> Result<Vec<u8>, CaptureError> {
    let expected = (frame.width as usize)
        .checked_mul(frame.height as usize)
        .and_then(|px| px.checked_mul(3))
        .ok_or_else(|| CaptureError::Encode("frame dimensions overflow".to_string()))?;
    if expected == 0 || frame.pixels.len() != expected {
        return Err(CaptureError::Encode(format!(
            "frame buffer is {} bytes, expected {} for {}x{} RGB",
            frame.pixels.len(),
            expected,
            frame.width,
            frame.height
        )));
    }

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode(
            &frame.pixels,
            frame.width,
            frame.height,
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| CaptureError::Encode(e.to_string()))?;
    Ok(out)
}
