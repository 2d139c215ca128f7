//! Window capture via the Composite off-screen buffers
//!
//! Pixels come back in the server's native layout (BGRX words, padded rows)
//! and are converted to tightly packed RGBA8 before being cached.

use image::ImageEncoder;
use tracing::debug;

use crate::backend::{ByteOrder, Capabilities, DisplayBackend, RawImage};
use crate::core::registry::{TrackedWindow, WindowFrame};

/// Source pixel layouts this pipeline cannot convert
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("Unsupported image format: {bits_per_pixel} bits per pixel at depth {depth}")]
    Unsupported { bits_per_pixel: u8, depth: u8 },

    #[error("Image data truncated: need {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

/// Result of one capture attempt
#[derive(Debug, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Nothing to do this frame
    Skipped,
    /// Fresh RGBA buffer for the window's current size
    Captured(Vec<u8>),
    /// Pixels were read but could not be converted
    Unsupported(FormatError),
    /// The server refused the read (window gone, not redirected, ...)
    Failed,
}

/// Whether `window` should be re-read this frame
pub fn needs_capture(capabilities: &Capabilities, window: &TrackedWindow) -> bool {
    if !capabilities.compositing() || !window.mapped {
        return false;
    }
    if window.geometry.width == 0 || window.geometry.height == 0 {
        return false;
    }
    // Without change notifications every frame is a capture frame
    !capabilities.change_notification() || window.dirty
}

/// Read and convert the window's off-screen buffer if it is due
pub fn capture(
    backend: &dyn DisplayBackend,
    capabilities: &Capabilities,
    window: &TrackedWindow,
) -> CaptureOutcome {
    if !needs_capture(capabilities, window) {
        return CaptureOutcome::Skipped;
    }

    let (width, height) = (window.geometry.width, window.geometry.height);
    let image = match backend.read_pixels(window.native, width, height) {
        Ok(image) => image,
        Err(e) => {
            debug!("Capture of window {} failed: {}", window.id, e);
            return CaptureOutcome::Failed;
        }
    };

    match convert_to_rgba(&image) {
        Ok(pixels) => CaptureOutcome::Captured(pixels),
        Err(e) => CaptureOutcome::Unsupported(e),
    }
}

/// Convert a server image to packed RGBA8
///
/// Row stride is taken from the image and may exceed `width * bytes_per_pixel`.
pub fn convert_to_rgba(image: &RawImage) -> Result<Vec<u8>, FormatError> {
    let bytes_per_pixel = match (image.bits_per_pixel, image.depth) {
        (32, 24 | 32) => 4,
        (16, 16) => 2,
        (bits_per_pixel, depth) => {
            return Err(FormatError::Unsupported {
                bits_per_pixel,
                depth,
            });
        }
    };

    let width = image.width as usize;
    let height = image.height as usize;
    if width == 0 || height == 0 {
        return Ok(Vec::new());
    }

    let row_bytes = width * bytes_per_pixel;
    let expected = image.stride * (height - 1) + row_bytes;
    if image.stride < row_bytes || image.data.len() < expected {
        return Err(FormatError::Truncated {
            expected,
            actual: image.data.len(),
        });
    }

    let keep_alpha = image.depth == 32;
    let mut out = Vec::with_capacity(width * height * 4);

    for row in image.data.chunks(image.stride).take(height) {
        for px in row[..row_bytes].chunks_exact(bytes_per_pixel) {
            let rgba = match bytes_per_pixel {
                4 => {
                    let word = match image.byte_order {
                        ByteOrder::LsbFirst => u32::from_le_bytes([px[0], px[1], px[2], px[3]]),
                        ByteOrder::MsbFirst => u32::from_be_bytes([px[0], px[1], px[2], px[3]]),
                    };
                    let alpha = if keep_alpha { (word >> 24) as u8 } else { 0xff };
                    [(word >> 16) as u8, (word >> 8) as u8, word as u8, alpha]
                }
                _ => {
                    let word = match image.byte_order {
                        ByteOrder::LsbFirst => u16::from_le_bytes([px[0], px[1]]),
                        ByteOrder::MsbFirst => u16::from_be_bytes([px[0], px[1]]),
                    };
                    let r = ((word >> 11) & 0x1f) as u8;
                    let g = ((word >> 5) & 0x3f) as u8;
                    let b = (word & 0x1f) as u8;
                    [(r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2), 0xff]
                }
            };
            out.extend_from_slice(&rgba);
        }
    }

    Ok(out)
}

/// Encode a captured frame as PNG
pub fn encode_png(frame: &WindowFrame) -> anyhow::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let encoder = image::codecs::png::PngEncoder::new(&mut buffer);
    encoder.write_image(
        &frame.pixels,
        frame.width,
        frame.height,
        image::ExtendedColorType::Rgba8,
    )?;
    Ok(buffer)
}
