use log::debug;
use serde::{Deserialize, Serialize};

use crate::buffer::{alloc_pixels, PixelBuffer, PixelLayout};
use crate::error::ImageError;
use crate::handle::{PlatformImage, Raster};
use crate::ops::downscale_to_longest_edge;

/// Configuration for image ingestion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Images whose longest edge exceeds this value are downscaled to it.
    /// `None` or `0` keeps the source resolution.
    pub max_longest_edge: Option<usize>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_longest_edge: Some(1024),
        }
    }
}

/// Convert a platform image into a canonical RGBA8 pixel buffer.
///
/// The handle is only read; nothing derived from it is retained besides the
/// returned buffer.
///
/// # Errors
///
/// * [`ImageError::InvalidHandle`] when the raster description is inconsistent.
/// * [`ImageError::ZeroArea`] when the image has no pixels.
/// * [`ImageError::Decode`] / [`ImageError::Unreadable`] when the backing store cannot be read.
/// * [`ImageError::Allocation`] when the pixel buffer cannot be allocated.
///
/// # Examples
///
/// ```
/// use lumi_image::{ingest, ImageSize, IngestConfig, PixelLayout, RasterImage};
///
/// let handle = RasterImage::new(
///     ImageSize { width: 2, height: 1 },
///     PixelLayout::Gray8,
///     vec![0, 255],
/// );
/// let buffer = ingest(&handle, &IngestConfig::default()).unwrap();
///
/// assert_eq!(buffer.pixel(1, 0), Some([255, 255, 255, 255]));
/// ```
pub fn ingest<H: PlatformImage + ?Sized>(
    handle: &H,
    config: &IngestConfig,
) -> Result<PixelBuffer, ImageError> {
    let raster = handle.raster()?;
    validate_raster(&raster)?;

    let buffer = convert_to_rgba8(&raster)?;
    drop(raster);

    debug!(
        "Ingested image: {}x{}",
        buffer.width(),
        buffer.height()
    );

    match config.max_longest_edge {
        Some(max_edge) if max_edge > 0 && buffer.size().longest_edge() > max_edge => {
            let resized = downscale_to_longest_edge(buffer, max_edge)?;
            debug!(
                "Downscaled image to {}x{} (max edge {max_edge})",
                resized.width(),
                resized.height()
            );
            Ok(resized)
        }
        _ => Ok(buffer),
    }
}

/// Check the raster description against its backing store.
fn validate_raster(raster: &Raster<'_>) -> Result<(), ImageError> {
    if raster.size.is_empty() {
        return Err(ImageError::ZeroArea(raster.size));
    }

    let row_bytes = raster
        .size
        .width
        .checked_mul(raster.layout.bytes_per_pixel())
        .ok_or_else(|| ImageError::InvalidHandle("row size overflows".to_string()))?;

    if raster.stride < row_bytes {
        return Err(ImageError::InvalidHandle(format!(
            "row stride of {} bytes is smaller than the {row_bytes} bytes of a {:?} row",
            raster.stride, raster.layout
        )));
    }

    let required = raster
        .stride
        .checked_mul(raster.size.height - 1)
        .and_then(|n| n.checked_add(row_bytes))
        .ok_or_else(|| ImageError::InvalidHandle("backing store size overflows".to_string()))?;

    if raster.data.len() < required {
        return Err(ImageError::InvalidHandle(format!(
            "backing store holds {} bytes, {required} required for {}",
            raster.data.len(),
            raster.size
        )));
    }

    Ok(())
}

/// Convert a validated raster row by row into tightly packed RGBA8.
fn convert_to_rgba8(raster: &Raster<'_>) -> Result<PixelBuffer, ImageError> {
    let mut out = alloc_pixels(raster.size)?;
    let row_bytes = raster.size.width * raster.layout.bytes_per_pixel();

    for y in 0..raster.size.height {
        let start = y * raster.stride;
        let row = &raster.data[start..start + row_bytes];
        convert_row(raster.layout, row, &mut out);
    }

    PixelBuffer::new(raster.size, out)
}

fn convert_row(layout: PixelLayout, row: &[u8], out: &mut Vec<u8>) {
    match layout {
        PixelLayout::Gray8 => {
            for &g in row {
                out.extend_from_slice(&[g, g, g, u8::MAX]);
            }
        }
        PixelLayout::Rgb8 => {
            for px in row.chunks_exact(3) {
                out.extend_from_slice(&[px[0], px[1], px[2], u8::MAX]);
            }
        }
        PixelLayout::Rgba8 => out.extend_from_slice(row),
        PixelLayout::Bgra8 => {
            for px in row.chunks_exact(4) {
                out.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
            }
        }
        PixelLayout::Argb8 => {
            for px in row.chunks_exact(4) {
                out.extend_from_slice(&[px[1], px[2], px[3], px[0]]);
            }
        }
        PixelLayout::Rgba16 => {
            for ch in row.chunks_exact(2) {
                out.push(u16_to_u8(u16::from_le_bytes([ch[0], ch[1]])));
            }
        }
        PixelLayout::RgbaF32 => {
            for ch in row.chunks_exact(4) {
                out.push(f32_to_u8(f32::from_le_bytes([ch[0], ch[1], ch[2], ch[3]])));
            }
        }
    }
}

fn u16_to_u8(v: u16) -> u8 {
    ((v as u32 * 255 + 32_767) / 65_535) as u8
}

fn f32_to_u8(v: f32) -> u8 {
    if v.is_nan() {
        return 0;
    }
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}
