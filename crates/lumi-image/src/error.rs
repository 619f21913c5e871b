use crate::buffer::ImageSize;

/// An error type for the image module.
#[derive(thiserror::Error, Debug)]
pub enum ImageError {
    /// The handle is null or its raster description is inconsistent.
    #[error("invalid image handle: {0}")]
    InvalidHandle(String),

    /// The image has no pixels.
    #[error("decode error: image has zero area ({0})")]
    ZeroArea(ImageSize),

    /// Error when the compressed image data cannot be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] ::image::ImageError),

    /// Error when the backing store of the handle cannot be read.
    #[error("decode error: backing store unreadable: {0}")]
    Unreadable(String),

    /// Error to read the image file.
    #[error("decode error: failed to read the image file. {0}")]
    Io(#[from] std::io::Error),

    /// Error when channel data and shape are not valid.
    #[error("decode error: data length ({0}) does not match the image size ({1})")]
    InvalidChannelShape(usize, usize),

    /// Error when the pixel buffer cannot be allocated.
    #[error("allocation error: failed to allocate {bytes} bytes for a pixel buffer")]
    Allocation {
        /// Number of bytes requested.
        bytes: usize,
    },
}
