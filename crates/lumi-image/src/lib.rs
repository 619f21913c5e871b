#![deny(missing_docs)]
//! Image ingestion for on-device multimodal inference.
//!
//! Converts opaque platform image handles into a single canonical pixel format
//! (8-bit interleaved RGBA) that the vision encoder can consume.

/// Error types for the image module.
pub mod error;

/// Platform image handles and raster views.
pub mod handle;

/// Canonical pixel buffer representation.
pub mod buffer;

/// Ingestion of platform images into canonical pixel buffers.
pub mod ingest;

/// Operations on canonical pixel buffers.
pub mod ops;

pub use crate::buffer::{ImageSize, PixelBuffer, PixelLayout};
pub use crate::error::ImageError;
pub use crate::handle::{EncodedImage, PlatformImage, Raster, RasterImage};
pub use crate::ingest::{ingest, IngestConfig};
