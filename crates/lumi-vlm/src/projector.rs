use candle_core::{DType, Device, Tensor};

use crate::encoder::VisionTower;

/// A lightweight deterministic vision tower.
///
/// Average-pools the input into a `grid x grid` layout of patches and projects every
/// patch color with a fixed linear layer. Useful where no real tower is available,
/// e.g. to exercise the session pipeline end to end.
pub struct PatchProjector {
    input_size: usize,
    grid: usize,
    hidden_size: usize,
    weight: Tensor, // (3, hidden_size)
    bias: Tensor,   // (hidden_size)
}

impl PatchProjector {
    /// Create a projector for `input_size x input_size` inputs producing `grid * grid` vectors.
    ///
    /// The weights are derived from `seed` so two projectors with the same arguments
    /// produce identical embeddings.
    pub fn new(
        input_size: usize,
        grid: usize,
        hidden_size: usize,
        seed: u64,
        device: &Device,
    ) -> candle_core::Result<Self> {
        if grid == 0 || hidden_size == 0 || input_size % grid != 0 {
            candle_core::bail!(
                "input size {input_size} must be a non-zero multiple of the grid {grid}, hidden {hidden_size}"
            );
        }

        let weight = (0..3 * hidden_size)
            .map(|i| ((i as u64 + seed) as f32 * 0.618_034).sin() * 0.5)
            .collect::<Vec<_>>();
        let bias = (0..hidden_size)
            .map(|i| ((i as u64 + seed) as f32 * 0.414_214).cos() * 0.1)
            .collect::<Vec<_>>();

        Ok(Self {
            input_size,
            grid,
            hidden_size,
            weight: Tensor::from_vec(weight, (3, hidden_size), device)?,
            bias: Tensor::from_vec(bias, hidden_size, device)?,
        })
    }
}

impl VisionTower for PatchProjector {
    fn input_size(&self) -> usize {
        self.input_size
    }

    fn num_vectors(&self) -> usize {
        self.grid * self.grid
    }

    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn forward(&self, pixel_values: &Tensor) -> candle_core::Result<Tensor> {
        let (c, h, w) = pixel_values.dims3()?;
        if c != 3 || h != self.input_size || w != self.input_size {
            candle_core::bail!(
                "expected a (3, {0}, {0}) input, got ({c}, {h}, {w})",
                self.input_size
            );
        }
        let patch = self.input_size / self.grid;

        let pooled = pixel_values
            .to_dtype(DType::F32)?
            .reshape((c, self.grid, patch, self.grid, patch))?
            .mean(4)?
            .mean(2)?; // (3, grid, grid)

        pooled
            .reshape((c, self.grid * self.grid))?
            .t()?
            .contiguous()?
            .matmul(&self.weight)?
            .broadcast_add(&self.bias)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use candle_core::IndexOp;

    use super::*;

    #[test]
    fn projector_output_shape() -> candle_core::Result<()> {
        let tower = PatchProjector::new(8, 2, 5, 7, &Device::Cpu)?;
        assert_eq!(tower.num_vectors(), 4);

        let input = Tensor::zeros((3, 8, 8), DType::F32, &Device::Cpu)?;
        let out = tower.forward(&input)?;
        assert_eq!(out.dims(), &[4, 5]);

        // a zero image only leaves the bias
        let bias = tower.bias.to_vec1::<f32>()?;
        for (a, b) in out.i(3)?.to_vec1::<f32>()?.iter().zip(bias.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-6);
        }
        Ok(())
    }

    #[test]
    fn projector_distinguishes_patches() -> candle_core::Result<()> {
        let tower = PatchProjector::new(4, 2, 3, 1, &Device::Cpu)?;

        // left half bright, right half dark
        let mut data = vec![0f32; 3 * 4 * 4];
        for c in 0..3 {
            for y in 0..4 {
                for x in 0..2 {
                    data[c * 16 + y * 4 + x] = 1.0;
                }
            }
        }
        let input = Tensor::from_vec(data, (3, 4, 4), &Device::Cpu)?;
        let out = tower.forward(&input)?;

        let left = out.i(0)?.to_vec1::<f32>()?;
        let right = out.i(1)?.to_vec1::<f32>()?;
        assert_ne!(left, right);
        assert_eq!(left, out.i(2)?.to_vec1::<f32>()?);
        Ok(())
    }

    #[test]
    fn projector_is_deterministic() -> candle_core::Result<()> {
        let a = PatchProjector::new(4, 1, 6, 3, &Device::Cpu)?;
        let b = PatchProjector::new(4, 1, 6, 3, &Device::Cpu)?;
        assert_eq!(a.weight.to_vec2::<f32>()?, b.weight.to_vec2::<f32>()?);
        Ok(())
    }

    #[test]
    fn projector_rejects_bad_input() -> candle_core::Result<()> {
        assert!(PatchProjector::new(5, 2, 3, 0, &Device::Cpu).is_err());

        let tower = PatchProjector::new(4, 2, 3, 0, &Device::Cpu)?;
        let input = Tensor::zeros((3, 8, 8), DType::F32, &Device::Cpu)?;
        assert!(tower.forward(&input).is_err());
        Ok(())
    }
}
