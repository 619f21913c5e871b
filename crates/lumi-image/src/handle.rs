use std::borrow::Cow;
use std::path::Path;
use std::sync::Arc;

use crate::buffer::{ImageSize, PixelLayout};
use crate::error::ImageError;

/// A read-only view over the pixels behind a platform image handle.
///
/// The description is reported by the platform and is not trusted: ingestion
/// validates stride and length before touching the data.
#[derive(Debug, Clone)]
pub struct Raster<'a> {
    /// Size of the image in pixels.
    pub size: ImageSize,
    /// Memory layout of a single pixel.
    pub layout: PixelLayout,
    /// Number of bytes between the start of two consecutive rows.
    pub stride: usize,
    /// The backing store.
    pub data: Cow<'a, [u8]>,
}

/// An opaque, platform-owned image.
///
/// Implementors expose their pixels as a [`Raster`]. The engine only reads
/// through this trait and never retains the handle past ingestion.
pub trait PlatformImage {
    /// Expose the pixels of the image.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store cannot be read or decoded.
    fn raster(&self) -> Result<Raster<'_>, ImageError>;
}

impl<T: PlatformImage + ?Sized> PlatformImage for &T {
    fn raster(&self) -> Result<Raster<'_>, ImageError> {
        (**self).raster()
    }
}

impl<T: PlatformImage + ?Sized> PlatformImage for Box<T> {
    fn raster(&self) -> Result<Raster<'_>, ImageError> {
        (**self).raster()
    }
}

impl<T: PlatformImage + ?Sized> PlatformImage for Arc<T> {
    fn raster(&self) -> Result<Raster<'_>, ImageError> {
        (**self).raster()
    }
}

/// An uncompressed raster as handed over by a graphics buffer.
///
/// The description is stored as given; inconsistent descriptions are rejected
/// at ingestion time.
#[derive(Debug, Clone)]
pub struct RasterImage {
    size: ImageSize,
    layout: PixelLayout,
    stride: usize,
    data: Vec<u8>,
}

impl RasterImage {
    /// Create a raster with tightly packed rows.
    ///
    /// # Examples
    ///
    /// ```
    /// use lumi_image::{ImageSize, PixelLayout, RasterImage};
    ///
    /// let raster = RasterImage::new(
    ///     ImageSize { width: 2, height: 2 },
    ///     PixelLayout::Rgb8,
    ///     vec![0u8; 2 * 2 * 3],
    /// );
    /// assert_eq!(raster.stride(), 6);
    /// ```
    pub fn new(size: ImageSize, layout: PixelLayout, data: Vec<u8>) -> Self {
        let stride = size.width.saturating_mul(layout.bytes_per_pixel());
        Self::with_stride(size, layout, stride, data)
    }

    /// Create a raster whose rows are `stride` bytes apart.
    pub fn with_stride(size: ImageSize, layout: PixelLayout, stride: usize, data: Vec<u8>) -> Self {
        Self {
            size,
            layout,
            stride,
            data,
        }
    }

    /// The size reported for the raster.
    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// The layout reported for the raster.
    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    /// The row stride reported for the raster.
    pub fn stride(&self) -> usize {
        self.stride
    }
}

impl PlatformImage for RasterImage {
    fn raster(&self) -> Result<Raster<'_>, ImageError> {
        Ok(Raster {
            size: self.size,
            layout: self.layout,
            stride: self.stride,
            data: Cow::Borrowed(&self.data),
        })
    }
}

/// A compressed image (PNG, JPEG, WebP, ...) decoded on demand.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    bytes: Vec<u8>,
}

impl EncodedImage {
    /// Wrap compressed image bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Read compressed image bytes from a file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ImageError> {
        Ok(Self::from_bytes(std::fs::read(path)?))
    }

    /// Number of compressed bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the handle holds no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl PlatformImage for EncodedImage {
    fn raster(&self) -> Result<Raster<'_>, ImageError> {
        if self.bytes.is_empty() {
            return Err(ImageError::Unreadable("empty image data".to_string()));
        }

        // the decoder handles color type and bit depth, so the result is always rgba8
        let decoded = image::load_from_memory(&self.bytes)?.to_rgba8();
        let size = ImageSize {
            width: decoded.width() as usize,
            height: decoded.height() as usize,
        };

        Ok(Raster {
            size,
            layout: PixelLayout::Rgba8,
            stride: size.width * PixelLayout::Rgba8.bytes_per_pixel(),
            data: Cow::Owned(decoded.into_raw()),
        })
    }
}
