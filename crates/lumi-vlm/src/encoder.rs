use std::borrow::Cow;
use std::sync::Arc;

use candle_core::{DType, Device, Shape, Tensor};
use log::debug;
use lumi_image::{ops, ImageError, ImageSize, PixelBuffer};
use serde::{Deserialize, Serialize};

/// The vision tower of a multimodal model.
///
/// Takes a normalized `(3, S, S)` image tensor, `S` being [`VisionTower::input_size`],
/// and returns a fixed-length sequence of embeddings in the language model space.
pub trait VisionTower: Send + Sync {
    /// Edge length of the square input in pixels.
    fn input_size(&self) -> usize;

    /// Number of embedding vectors produced for a single image.
    fn num_vectors(&self) -> usize;

    /// Width of every embedding vector.
    fn hidden_size(&self) -> usize;

    /// Project the pixel values into a `(num_vectors, hidden_size)` tensor.
    fn forward(&self, pixel_values: &Tensor) -> candle_core::Result<Tensor>;
}

/// Errors produced while turning pixels into embeddings.
#[derive(thiserror::Error, Debug)]
pub enum EncodeError {
    #[error("encode error: image of {size} cannot be fit into the {edge}x{edge} vision input")]
    IncompatibleShape { size: ImageSize, edge: usize },

    #[error("encode error: vision tower returned shape {actual:?}, expected [{vectors}, {hidden}]")]
    OutputShape {
        actual: Vec<usize>,
        vectors: usize,
        hidden: usize,
    },

    #[error("encode error: vision tower produced non-finite embeddings")]
    NonFinite,

    #[error("encode error: vision tower failed: {0}")]
    Tower(candle_core::Error),

    #[error("encode error: invalid encoder configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error("encode error: {0}")]
    Candle(#[from] candle_core::Error),
}

/// Pixel normalization applied before the vision tower.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionEncoderConfig {
    pub image_mean: [f32; 3],
    pub image_std: [f32; 3],
    pub rescale_factor: f32,
}

impl Default for VisionEncoderConfig {
    fn default() -> Self {
        Self {
            image_mean: [0.5, 0.5, 0.5],
            image_std: [0.5, 0.5, 0.5],
            rescale_factor: 1.0 / 255.0,
        }
    }
}

/// A sequence of embedding vectors of shape `(len, hidden_size)`.
#[derive(Clone, Debug)]
pub struct EmbeddingSequence {
    embeddings: Tensor,
}

impl EmbeddingSequence {
    /// Wrap a 2D tensor with at least one vector.
    pub fn new(embeddings: Tensor) -> Result<Self, EncodeError> {
        match embeddings.dims() {
            [n, d] if *n > 0 && *d > 0 => Ok(Self { embeddings }),
            dims => Err(EncodeError::OutputShape {
                actual: dims.to_vec(),
                vectors: 0,
                hidden: 0,
            }),
        }
    }

    /// Number of vectors in the sequence.
    pub fn len(&self) -> usize {
        self.embeddings.dims()[0]
    }

    /// Always false, sequences hold at least one vector.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Width of every vector.
    pub fn hidden_size(&self) -> usize {
        self.embeddings.dims()[1]
    }

    pub fn tensor(&self) -> &Tensor {
        &self.embeddings
    }

    pub fn into_tensor(self) -> Tensor {
        self.embeddings
    }
}

/// Adapts canonical pixel buffers to a [`VisionTower`].
///
/// The image is resized so that its longest edge matches the tower input, padded
/// bottom/right to a square, normalized and projected.
#[derive(Clone)]
pub struct VisionEncoder {
    tower: Arc<dyn VisionTower>,
    config: VisionEncoderConfig,
    device: Device,

    buf_mean_tensor: Tensor,
    buf_std_tensor: Tensor,
}

impl VisionEncoder {
    pub fn new(
        tower: Arc<dyn VisionTower>,
        config: VisionEncoderConfig,
        device: &Device,
    ) -> Result<Self, EncodeError> {
        if tower.input_size() == 0 || tower.num_vectors() == 0 || tower.hidden_size() == 0 {
            return Err(EncodeError::InvalidConfig(format!(
                "vision tower reports input {}, vectors {}, hidden {}",
                tower.input_size(),
                tower.num_vectors(),
                tower.hidden_size()
            )));
        }
        if config.image_std.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(EncodeError::InvalidConfig(format!(
                "image_std must be positive, got {:?}",
                config.image_std
            )));
        }

        Ok(Self {
            buf_mean_tensor: Tensor::from_slice(&config.image_mean[..], (3, 1, 1), device)?,
            buf_std_tensor: Tensor::from_slice(&config.image_std[..], (3, 1, 1), device)?,
            tower,
            config,
            device: device.clone(),
        })
    }

    /// Number of vectors produced for every image.
    pub fn num_vectors(&self) -> usize {
        self.tower.num_vectors()
    }

    pub fn hidden_size(&self) -> usize {
        self.tower.hidden_size()
    }

    pub fn config(&self) -> &VisionEncoderConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Project a pixel buffer into the embedding space of the model.
    pub fn encode(&self, buffer: &PixelBuffer) -> Result<EmbeddingSequence, EncodeError> {
        let edge = self.tower.input_size();
        let target = buffer
            .size()
            .fit_longest_edge_clamped(edge)
            .ok_or(EncodeError::IncompatibleShape {
                size: buffer.size(),
                edge,
            })?;

        let resized = if target == buffer.size() {
            Cow::Borrowed(buffer)
        } else {
            Cow::Owned(ops::resize(buffer, target)?)
        };

        debug!(
            "Encoding image {}x{} as {}x{} in a {edge}x{edge} input",
            buffer.width(),
            buffer.height(),
            resized.width(),
            resized.height()
        );

        let pixel_values = self.image_to_normalized_tensor(&resized, edge)?;
        let embeddings = self
            .tower
            .forward(&pixel_values)
            .map_err(EncodeError::Tower)?;

        let (vectors, hidden) = (self.tower.num_vectors(), self.tower.hidden_size());
        if embeddings.dims() != [vectors, hidden] {
            return Err(EncodeError::OutputShape {
                actual: embeddings.dims().to_vec(),
                vectors,
                hidden,
            });
        }

        let embeddings = embeddings.to_dtype(DType::F32)?;
        if has_non_finite(&embeddings)? {
            return Err(EncodeError::NonFinite);
        }

        EmbeddingSequence::new(embeddings)
    }

    /// Drop alpha, pad to `edge x edge` and normalize into a `(3, edge, edge)` tensor.
    fn image_to_normalized_tensor(
        &self,
        img: &PixelBuffer,
        edge: usize,
    ) -> Result<Tensor, EncodeError> {
        let mut rgb = vec![0u8; edge * edge * 3];

        // copy image data row by row, the remainder stays zero
        for y in 0..img.height() {
            let src = img.row(y).ok_or(EncodeError::IncompatibleShape {
                size: img.size(),
                edge,
            })?;
            let dst = &mut rgb[y * edge * 3..(y * edge + img.width()) * 3];
            for (out, px) in dst.chunks_exact_mut(3).zip(src.chunks_exact(4)) {
                out.copy_from_slice(&px[..3]);
            }
        }

        let tensor = Tensor::from_vec(rgb, Shape::from_dims(&[edge, edge, 3]), &self.device)?
            .permute((2, 0, 1))?
            .to_dtype(DType::F32)?
            .affine(self.config.rescale_factor as f64, 0.0)?;

        Ok(tensor
            .broadcast_sub(&self.buf_mean_tensor)?
            .broadcast_div(&self.buf_std_tensor)?)
    }
}

impl std::fmt::Debug for VisionEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionEncoder")
            .field("input_size", &self.tower.input_size())
            .field("num_vectors", &self.tower.num_vectors())
            .field("hidden_size", &self.tower.hidden_size())
            .field("config", &self.config)
            .finish()
    }
}

/// Return true if any element in `tensor` is not finite (NaN or +/-Inf).
pub(crate) fn has_non_finite(tensor: &Tensor) -> candle_core::Result<bool> {
    let values = tensor
        .to_dtype(DType::F32)?
        .flatten_all()?
        .to_vec1::<f32>()?;
    Ok(values.iter().any(|v| !v.is_finite()))
}
