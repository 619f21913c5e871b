use image::imageops::{self, FilterType};
use image::RgbaImage;

use crate::buffer::{ImageSize, PixelBuffer};
use crate::error::ImageError;

/// Resize a pixel buffer to the given size using a triangle (bilinear) filter.
///
/// # Errors
///
/// Returns an error when the target size is empty.
///
/// Example:
///
/// ```
/// use lumi_image::{ImageSize, PixelBuffer};
/// use lumi_image::ops::resize;
///
/// let buffer = PixelBuffer::from_size_val(ImageSize { width: 8, height: 4 }, [10, 20, 30, 255]).unwrap();
/// let resized = resize(&buffer, ImageSize { width: 4, height: 2 }).unwrap();
///
/// assert_eq!(resized.pixel(0, 0), Some([10, 20, 30, 255]));
/// ```
pub fn resize(src: &PixelBuffer, new_size: ImageSize) -> Result<PixelBuffer, ImageError> {
    if new_size.is_empty() {
        return Err(ImageError::ZeroArea(new_size));
    }
    if new_size == src.size() {
        return Ok(src.clone());
    }

    let view = RgbaImage::from_raw(
        src.width() as u32,
        src.height() as u32,
        src.as_slice().to_vec(),
    )
    .ok_or(ImageError::InvalidChannelShape(
        src.as_slice().len(),
        src.size().area() * PixelBuffer::CHANNELS,
    ))?;

    let resized = imageops::resize(
        &view,
        new_size.width as u32,
        new_size.height as u32,
        FilterType::Triangle,
    );

    PixelBuffer::new(new_size, resized.into_raw())
}

/// Shrink a pixel buffer so that its longest edge is at most `max_edge`, preserving aspect ratio.
///
/// Buffers already within the limit are returned unchanged.
pub fn downscale_to_longest_edge(
    src: PixelBuffer,
    max_edge: usize,
) -> Result<PixelBuffer, ImageError> {
    if src.size().longest_edge() <= max_edge {
        return Ok(src);
    }

    let new_size = src
        .size()
        .fit_longest_edge_clamped(max_edge)
        .ok_or(ImageError::ZeroArea(src.size()))?;

    resize(&src, new_size)
}
