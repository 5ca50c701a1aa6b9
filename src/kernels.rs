//! The three production filter kernels, as an immutable lookup table.
//!
//! The table is built once at process start and passed by reference to the
//! coordinator and workers. Weights are fixed for the run; the pipeline never
//! mutates them.

use crate::errors::{PipelineError, Result};

/// Identifies one of the three filter layers, applied in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    /// Extreme Laplacian (edge isolation), 5x5
    One,
    /// Deep difference of Gaussians, 7x7
    Two,
    /// High-pass sharpen (structural reinforcement), 3x3
    Three,
}

impl Layer {
    /// All layers in application order.
    pub const ALL: [Layer; 3] = [Layer::One, Layer::Two, Layer::Three];

    /// Zero-based index into the kernel table.
    pub fn index(self) -> usize {
        match self {
            Layer::One => 0,
            Layer::Two => 1,
            Layer::Three => 2,
        }
    }

    /// One-based layer number, for logs.
    pub fn number(self) -> u32 {
        self.index() as u32 + 1
    }
}

/// One layer's convolution kernel: square weight matrix, divisor, radius.
#[derive(Debug, Clone)]
pub struct KernelSpec {
    weights: Vec<Vec<f64>>,
    divisor: f64,
    radius: usize,
}

impl KernelSpec {
    /// Build a kernel spec from a square, odd-sized weight matrix.
    pub fn new(weights: Vec<Vec<f64>>, divisor: f64) -> Result<Self> {
        let size = weights.len();
        if size == 0 || size % 2 == 0 {
            return Err(PipelineError::Config(format!(
                "kernel size must be odd and non-zero, got {}",
                size
            )));
        }
        if weights.iter().any(|row| row.len() != size) {
            return Err(PipelineError::Config(format!(
                "kernel must be square ({size}x{size})"
            )));
        }
        if divisor == 0.0 {
            return Err(PipelineError::Config("kernel divisor must be non-zero".into()));
        }
        Ok(Self {
            weights,
            divisor,
            radius: size / 2,
        })
    }

    pub fn weights(&self) -> &[Vec<f64>] {
        &self.weights
    }

    pub fn divisor(&self) -> f64 {
        self.divisor
    }

    /// Maximum neighbor offset read during convolution: (size - 1) / 2.
    pub fn radius(&self) -> usize {
        self.radius
    }

    pub fn size(&self) -> usize {
        self.weights.len()
    }
}

/// Immutable per-layer kernel lookup.
pub struct KernelTable {
    specs: [KernelSpec; 3],
}

impl KernelTable {
    /// Build a table from explicit specs, one per layer.
    pub fn new(specs: [KernelSpec; 3]) -> Self {
        Self { specs }
    }

    /// The production three-layer filter sequence.
    pub fn production() -> Self {
        let one = KernelSpec::new(
            rows(&[
                &[-1, -1, -1, -1, -1],
                &[-1, 2, 2, 2, -1],
                &[-1, 2, 16, 2, -1],
                &[-1, 2, 2, 2, -1],
                &[-1, -1, -1, -1, -1],
            ]),
            1.0,
        )
        .expect("layer one kernel is statically valid");

        let two = KernelSpec::new(
            rows(&[
                &[-2, -6, -8, -10, -8, -6, -2],
                &[-6, -12, -18, -24, -18, -12, -6],
                &[-8, -18, 0, 24, 0, -18, -8],
                &[-10, -24, 24, 128, 24, -24, -10],
                &[-8, -18, 0, 24, 0, -18, -8],
                &[-6, -12, -18, -24, -18, -12, -6],
                &[-2, -6, -8, -10, -8, -6, -2],
            ]),
            1.0,
        )
        .expect("layer two kernel is statically valid");

        let three = KernelSpec::new(
            rows(&[&[0, -3, 0], &[-3, 16, -3], &[0, -3, 0]]),
            1.0,
        )
        .expect("layer three kernel is statically valid");

        Self::new([one, two, three])
    }

    /// Look up the spec for a layer.
    pub fn spec_for(&self, layer: Layer) -> &KernelSpec {
        &self.specs[layer.index()]
    }

    /// The largest radius across all layers.
    pub fn max_radius(&self) -> usize {
        self.specs.iter().map(KernelSpec::radius).max().unwrap_or(0)
    }
}

fn rows(src: &[&[i32]]) -> Vec<Vec<f64>> {
    src.iter()
        .map(|r| r.iter().map(|&w| f64::from(w)).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_radii() {
        let table = KernelTable::production();
        assert_eq!(table.spec_for(Layer::One).radius(), 2);
        assert_eq!(table.spec_for(Layer::Two).radius(), 3);
        assert_eq!(table.spec_for(Layer::Three).radius(), 1);
        assert_eq!(table.max_radius(), 3);
    }

    #[test]
    fn test_production_sizes_and_divisors() {
        let table = KernelTable::production();
        assert_eq!(table.spec_for(Layer::One).size(), 5);
        assert_eq!(table.spec_for(Layer::Two).size(), 7);
        assert_eq!(table.spec_for(Layer::Three).size(), 3);
        for layer in Layer::ALL {
            assert_eq!(table.spec_for(layer).divisor(), 1.0);
        }
    }

    #[test]
    fn test_layer_one_weight_sum() {
        // 16 border cells at -1, 8 ring cells at 2, center 16.
        let spec = KernelTable::production();
        let sum: f64 = spec
            .spec_for(Layer::One)
            .weights()
            .iter()
            .flatten()
            .sum();
        assert_eq!(sum, 16.0);
    }

    #[test]
    fn test_even_kernel_rejected() {
        let result = KernelSpec::new(vec![vec![1.0, 1.0], vec![1.0, 1.0]], 1.0);
        assert!(result.is_err());
    }

    #[test]
    fn test_non_square_kernel_rejected() {
        let result = KernelSpec::new(vec![vec![1.0, 1.0, 1.0]], 1.0);
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_divisor_rejected() {
        let result = KernelSpec::new(vec![vec![1.0]], 0.0);
        assert!(result.is_err());
    }

    #[test]
    fn test_layer_order() {
        assert_eq!(Layer::ALL[0].number(), 1);
        assert_eq!(Layer::ALL[2].number(), 3);
    }
}
