use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::ImageResult;

const JPEG_QUALITY: u8 = 85;

/// Re-encode a frame as a square JPEG thumbnail.
///
/// Frames larger than `max_edge` in either dimension are center-cropped to a
/// square no larger than `max_edge` and no larger than their shorter side.
/// Smaller frames are re-encoded as they are, never upscaled.
pub fn make_thumbnail(frame: &[u8], max_edge: u32) -> ImageResult<Vec<u8>> {
    let img = image::load_from_memory(frame)?;
    let (width, height) = (img.width(), img.height());

    let img = if width > max_edge || height > max_edge {
        let side = max_edge.min(width).min(height);
        img.resize_to_fill(side, side, FilterType::Lanczos3)
    } else {
        img
    };

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY).encode_image(&img.to_rgb8())?;
    Ok(out)
}
