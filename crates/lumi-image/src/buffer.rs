use serde::{Deserialize, Serialize};

use crate::error::ImageError;

/// Image size in pixels
///
/// A struct to represent the size of an image in pixels.
///
/// # Examples
///
/// ```
/// use lumi_image::ImageSize;
///
/// let image_size = ImageSize {
///   width: 10,
///   height: 20,
/// };
///
/// assert_eq!(image_size.width, 10);
/// assert_eq!(image_size.height, 20);
/// assert_eq!(image_size.longest_edge(), 20);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    /// Width of the image in pixels
    pub width: usize,
    /// Height of the image in pixels
    pub height: usize,
}

impl ImageSize {
    /// Number of pixels covered by the size.
    pub fn area(&self) -> usize {
        self.width * self.height
    }

    /// Whether the size covers no pixels at all.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// The longest of both edges.
    pub fn longest_edge(&self) -> usize {
        self.width.max(self.height)
    }

    /// Scale the size so that its longest edge equals `target`, preserving aspect ratio.
    ///
    /// Returns `None` when one of the scaled edges would collapse to zero pixels.
    pub fn fit_longest_edge(&self, target: usize) -> Option<ImageSize> {
        let longest = self.longest_edge();
        if longest == 0 || target == 0 {
            return None;
        }
        let scale = target as f64 / longest as f64;
        let width = (self.width as f64 * scale).round() as usize;
        let height = (self.height as f64 * scale).round() as usize;
        if width == 0 || height == 0 {
            return None;
        }
        Some(ImageSize { width, height })
    }

    /// Like [`ImageSize::fit_longest_edge`], but a collapsing edge is kept at one pixel.
    ///
    /// Returns `None` only for an empty size or a zero `target`.
    ///
    /// ```
    /// use lumi_image::ImageSize;
    ///
    /// let thin = ImageSize { width: 100, height: 1 };
    /// assert_eq!(thin.fit_longest_edge_clamped(32), Some(ImageSize { width: 32, height: 1 }));
    /// ```
    pub fn fit_longest_edge_clamped(&self, target: usize) -> Option<ImageSize> {
        if self.is_empty() || target == 0 {
            return None;
        }
        let scale = target as f64 / self.longest_edge() as f64;
        Some(ImageSize {
            width: ((self.width as f64 * scale).round() as usize).max(1),
            height: ((self.height as f64 * scale).round() as usize).max(1),
        })
    }
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "ImageSize {{ width: {}, height: {} }}",
            self.width, self.height
        )
    }
}

impl From<[usize; 2]> for ImageSize {
    fn from(size: [usize; 2]) -> Self {
        ImageSize {
            width: size[0],
            height: size[1],
        }
    }
}

impl From<ImageSize> for [u32; 2] {
    fn from(size: ImageSize) -> Self {
        [size.width as u32, size.height as u32]
    }
}

/// Memory layout of the pixels behind a platform image handle.
///
/// Multi-byte channels are stored little-endian.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelLayout {
    /// One 8-bit luminance channel.
    Gray8,
    /// Three 8-bit channels.
    Rgb8,
    /// Four 8-bit channels, alpha last.
    Rgba8,
    /// Four 8-bit channels in blue, green, red, alpha order.
    Bgra8,
    /// Four 8-bit channels, alpha first.
    Argb8,
    /// Four 16-bit channels, alpha last.
    Rgba16,
    /// Four 32-bit float channels in the `[0, 1]` range, alpha last.
    RgbaF32,
}

impl PixelLayout {
    /// Number of bytes used by a single pixel.
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelLayout::Gray8 => 1,
            PixelLayout::Rgb8 => 3,
            PixelLayout::Rgba8 | PixelLayout::Bgra8 | PixelLayout::Argb8 => 4,
            PixelLayout::Rgba16 => 8,
            PixelLayout::RgbaF32 => 16,
        }
    }
}

/// A decoded image in the canonical 8-bit interleaved RGBA format.
///
/// Rows are tightly packed, so the stride is always `width * 4` bytes.
#[derive(Clone, Debug, PartialEq)]
pub struct PixelBuffer {
    size: ImageSize,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Number of interleaved channels of the canonical format.
    pub const CHANNELS: usize = 4;

    /// Create a new pixel buffer from RGBA8 pixel data.
    ///
    /// # Errors
    ///
    /// If the length of the pixel data does not match the image size, an error is returned.
    ///
    /// # Examples
    ///
    /// ```
    /// use lumi_image::{ImageSize, PixelBuffer};
    ///
    /// let buffer = PixelBuffer::new(
    ///     ImageSize { width: 2, height: 3 },
    ///     vec![0u8; 2 * 3 * 4],
    /// ).unwrap();
    ///
    /// assert_eq!(buffer.stride(), 8);
    /// ```
    pub fn new(size: ImageSize, data: Vec<u8>) -> Result<Self, ImageError> {
        let expected = size.area() * Self::CHANNELS;
        if data.len() != expected {
            return Err(ImageError::InvalidChannelShape(data.len(), expected));
        }
        Ok(Self { size, data })
    }

    /// Create a new pixel buffer filled with a single RGBA value.
    pub fn from_size_val(size: ImageSize, val: [u8; 4]) -> Result<Self, ImageError> {
        let mut data = alloc_pixels(size)?;
        for _ in 0..size.area() {
            data.extend_from_slice(&val);
        }
        Self::new(size, data)
    }

    /// The size of the buffer in pixels.
    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// The width of the buffer in pixels.
    pub fn width(&self) -> usize {
        self.size.width
    }

    /// The height of the buffer in pixels.
    pub fn height(&self) -> usize {
        self.size.height
    }

    /// Number of bytes between the start of two consecutive rows.
    pub fn stride(&self) -> usize {
        self.size.width * Self::CHANNELS
    }

    /// The raw RGBA8 pixel data.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Consume the buffer and return the raw RGBA8 pixel data.
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// A single row of pixels, or `None` when out of bounds.
    pub fn row(&self, y: usize) -> Option<&[u8]> {
        if y >= self.size.height {
            return None;
        }
        let start = y * self.stride();
        self.data.get(start..start + self.stride())
    }

    /// The RGBA value of a pixel, or `None` when out of bounds.
    pub fn pixel(&self, x: usize, y: usize) -> Option<[u8; 4]> {
        if x >= self.size.width {
            return None;
        }
        let row = self.row(y)?;
        let px = &row[x * Self::CHANNELS..(x + 1) * Self::CHANNELS];
        Some([px[0], px[1], px[2], px[3]])
    }
}

/// Reserve an empty RGBA8 pixel vector for `size`, reporting exhaustion instead of aborting.
pub(crate) fn alloc_pixels(size: ImageSize) -> Result<Vec<u8>, ImageError> {
    let bytes = size
        .width
        .checked_mul(size.height)
        .and_then(|n| n.checked_mul(PixelBuffer::CHANNELS))
        .ok_or(ImageError::Allocation { bytes: usize::MAX })?;

    let mut data = Vec::new();
    data.try_reserve_exact(bytes)
        .map_err(|_| ImageError::Allocation { bytes })?;
    Ok(data)
}
