//! Affine maps and Gaussian initialisation.

use ndarray::{Array1, Array2, ArrayView2};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// `(rows, cols)` matrix drawn from N(0, std²); zeros if `std` is not a valid
/// standard deviation.
pub fn gaussian<R: Rng + ?Sized>(rows: usize, cols: usize, std: f32, rng: &mut R) -> Array2<f32> {
    match Normal::new(0.0f32, std) {
        Ok(dist) => Array2::from_shape_simple_fn((rows, cols), || dist.sample(rng)),
        Err(_) => Array2::zeros((rows, cols)),
    }
}

/// `y = W x + b` with `W: [out, in]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Linear {
    pub weight: Array2<f32>,
    pub bias: Option<Array1<f32>>,
}

impl Linear {
    pub fn zeros(in_dim: usize, out_dim: usize, bias: bool) -> Self {
        Self {
            weight: Array2::zeros((out_dim, in_dim)),
            bias: bias.then(|| Array1::zeros(out_dim)),
        }
    }

    /// Gaussian weights, zero bias.
    pub fn seeded<R: Rng + ?Sized>(in_dim: usize, out_dim: usize, bias: bool, std: f32, rng: &mut R) -> Self {
        Self {
            weight: gaussian(out_dim, in_dim, std, rng),
            bias: bias.then(|| Array1::zeros(out_dim)),
        }
    }

    pub fn in_dim(&self) -> usize {
        self.weight.ncols()
    }

    pub fn out_dim(&self) -> usize {
        self.weight.nrows()
    }

    /// Row-batched forward: `[n, in] -> [n, out]`.
    pub fn forward(&self, x: ArrayView2<'_, f32>) -> Array2<f32> {
        let mut y = x.dot(&self.weight.t());
        if let Some(b) = &self.bias {
            y += b;
        }
        y
    }

    pub fn param_count(&self) -> usize {
        self.weight.len() + self.bias.as_ref().map_or(0, Array1::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_forward_applies_weight_and_bias() {
        let layer = Linear {
            weight: array![[1.0, 2.0], [0.0, -1.0], [0.5, 0.5]],
            bias: Some(array![0.1, 0.2, 0.3]),
        };
        let x = array![[1.0, 1.0], [2.0, 0.0]];
        let y = layer.forward(x.view());
        assert_eq!(y.dim(), (2, 3));
        let expected = array![[3.1, -0.8, 1.3], [2.1, 0.2, 1.3]];
        for (a, b) in y.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_seeded_is_deterministic() {
        let a = Linear::seeded(4, 3, true, 0.1, &mut StdRng::seed_from_u64(9));
        let b = Linear::seeded(4, 3, true, 0.1, &mut StdRng::seed_from_u64(9));
        assert_eq!(a.weight, b.weight);
        assert_eq!(a.param_count(), 15);
    }

    #[test]
    fn test_invalid_std_gives_zeros() {
        let w = gaussian(2, 2, -1.0, &mut StdRng::seed_from_u64(0));
        assert_eq!(w.sum(), 0.0);
    }
}
