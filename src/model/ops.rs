//! Small numeric helpers shared by the model and the search drivers.

use ndarray::{Array1, ArrayView1};

/// Softmax of a vector. `-inf` entries get probability 0; a vector with no
/// finite entry maps to all zeros.
pub fn softmax(logits: ArrayView1<'_, f32>) -> Array1<f32> {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    if max == f32::NEG_INFINITY {
        return Array1::zeros(logits.len());
    }
    let exp: Array1<f32> = logits.mapv(|v| (v - max).exp());
    let sum: f32 = exp.sum();
    exp / sum
}

/// Numerically stable log-softmax.
pub fn log_softmax(logits: ArrayView1<'_, f32>) -> Array1<f32> {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let log_sum = logits.iter().map(|&v| (v - max).exp()).sum::<f32>().ln() + max;
    logits.mapv(|v| v - log_sum)
}

/// Log-softmax of f32 logits computed in f64, for scores summed over many
/// steps.
pub fn log_softmax_f64(logits: ArrayView1<'_, f32>) -> Array1<f64> {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max) as f64;
    let log_sum = logits.iter().map(|&v| (v as f64 - max).exp()).sum::<f64>().ln() + max;
    logits.mapv(|v| v as f64 - log_sum)
}

/// Index of the largest element; ties go to the lowest index.
pub fn argmax(v: ArrayView1<'_, f32>) -> usize {
    let mut best = 0;
    let mut best_val = f32::NEG_INFINITY;
    for (i, &x) in v.iter().enumerate() {
        if x > best_val {
            best = i;
            best_val = x;
        }
    }
    best
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_softmax_basic() {
        let probs = softmax(array![1.0, 2.0, 3.0].view());
        assert!((probs.sum() - 1.0).abs() < 1e-5);
        assert!(probs[2] > probs[1]);
        assert!(probs[1] > probs[0]);
    }

    #[test]
    fn test_softmax_masked_entries() {
        let probs = softmax(array![0.5, f32::NEG_INFINITY, 0.5].view());
        assert_eq!(probs[1], 0.0);
        assert!((probs[0] - 0.5).abs() < 1e-6);

        let none = softmax(array![f32::NEG_INFINITY, f32::NEG_INFINITY].view());
        assert_eq!(none.sum(), 0.0);
    }

    #[test]
    fn test_log_softmax_matches_softmax() {
        let x = array![0.3, -1.2, 2.5, 0.0];
        let lp = log_softmax(x.view());
        let p = softmax(x.view());
        for (a, b) in lp.iter().zip(p.iter()) {
            assert!((a.exp() - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_log_softmax_f64_keeps_one_ulp_apart() {
        let x = array![1.0, 1.0 + f32::EPSILON, -3.0];
        let wide = log_softmax_f64(x.view());
        assert!(wide[1] > wide[0]);
        let narrow = log_softmax(x.view());
        assert!((wide[2] - narrow[2] as f64).abs() < 1e-5);
    }

    #[test]
    fn test_argmax_first_on_ties() {
        assert_eq!(argmax(array![0.1, 0.7, 0.2].view()), 1);
        assert_eq!(argmax(array![0.5, 0.9, 0.9].view()), 1);
    }

    #[test]
    fn test_sigmoid_midpoint() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-7);
    }
}
