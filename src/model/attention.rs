//! Additive (Bahdanau-style) attention over the encoder memory.
//!
//! ```text
//! e[i, t] = vᵀ tanh(W_s s_i + W_c c_t) + b      for t < len(row_i)
//! e[i, t] = -inf                                  otherwise
//! a[i, :] = softmax(e[i, :])
//! ctx_i   = Σ_t a[i, t] · c_t
//! ```
//!
//! `W_c c_t` does not depend on the decoder state, so it is computed once per
//! source batch ([`AdditiveAttention::project_keys`]) and reused at every step.
//! Query rows carry an explicit memory row index so that several beam
//! hypotheses can attend over the same source sentence in one call.

use ndarray::{s, Array2, Array3, ArrayView2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::linear::Linear;
use super::ops::softmax;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdditiveAttention {
    /// Decoder state → attention space: [A, H]
    pub state_proj: Linear,

    /// Encoder context → attention space: [A, C]
    pub context_proj: Linear,

    /// Attention space → scalar score: [1, A]
    pub score: Linear,
}

impl AdditiveAttention {
    pub fn seeded<R: Rng + ?Sized>(
        state_dim: usize,
        context_dim: usize,
        attn_dim: usize,
        std: f32,
        rng: &mut R,
    ) -> Self {
        Self {
            state_proj: Linear::seeded(state_dim, attn_dim, false, std, rng),
            context_proj: Linear::seeded(context_dim, attn_dim, true, std, rng),
            score: Linear::seeded(attn_dim, 1, true, std, rng),
        }
    }

    pub fn attn_dim(&self) -> usize {
        self.score.in_dim()
    }

    /// `[B, T, C] → [B, T, A]`.
    pub fn project_keys(&self, context: &Array3<f32>) -> Array3<f32> {
        let (b, t, _) = context.dim();
        let mut keys = Array3::zeros((b, t, self.attn_dim()));
        for (ctx, mut out) in context.outer_iter().zip(keys.outer_iter_mut()) {
            out.assign(&self.context_proj.forward(ctx));
        }
        keys
    }

    /// Attention weights `[n, T]` for query states `[n, H]`.
    ///
    /// Query `i` attends over memory row `rows[i]`, masked beyond
    /// `lengths[rows[i]]`. Masked positions get weight exactly 0.
    pub fn weights(
        &self,
        state: ArrayView2<'_, f32>,
        keys: &Array3<f32>,
        rows: &[usize],
        lengths: &[usize],
    ) -> Array2<f32> {
        let query = self.state_proj.forward(state);
        let score_w = self.score.weight.row(0);
        let score_b = self.score.bias.as_ref().map_or(0.0, |b| b[0]);
        let src_len = keys.len_of(Axis(1));

        let mut out = Array2::zeros((rows.len(), src_len));
        for (i, &r) in rows.iter().enumerate() {
            let len = lengths[r].min(src_len);
            let hidden = (keys.slice(s![r, ..len, ..]).to_owned() + &query.row(i)).mapv(f32::tanh);
            let mut energies = vec![f32::NEG_INFINITY; src_len];
            for (t, h) in hidden.outer_iter().enumerate() {
                energies[t] = h.dot(&score_w) + score_b;
            }
            out.row_mut(i)
                .assign(&softmax(ndarray::ArrayView1::from(&energies[..])));
        }
        out
    }

    /// Weighted sum of memory rows: `[n, T] × [B, T, C] → [n, C]`.
    pub fn context(weights: &Array2<f32>, context: &Array3<f32>, rows: &[usize]) -> Array2<f32> {
        let mut out = Array2::zeros((rows.len(), context.len_of(Axis(2))));
        for (i, &r) in rows.iter().enumerate() {
            out.row_mut(i)
                .assign(&weights.row(i).dot(&context.index_axis(Axis(0), r)));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn attention() -> AdditiveAttention {
        AdditiveAttention::seeded(3, 4, 5, 0.5, &mut StdRng::seed_from_u64(17))
    }

    fn memory() -> Array3<f32> {
        Array3::from_shape_fn((2, 4, 4), |(b, t, c)| ((b + 1) * (t + 2) + c) as f32 * 0.1)
    }

    #[test]
    fn test_weights_sum_to_one_and_respect_mask() {
        let att = attention();
        let ctx = memory();
        let keys = att.project_keys(&ctx);
        let state = Array2::from_elem((3, 3), 0.2);
        let w = att.weights(state.view(), &keys, &[0, 1, 1], &[4, 2]);

        for row in w.outer_iter() {
            assert!((row.sum() - 1.0).abs() < 1e-5);
        }
        assert_eq!(w[[1, 2]], 0.0);
        assert_eq!(w[[1, 3]], 0.0);
        assert!(w[[0, 3]] > 0.0);
    }

    #[test]
    fn test_context_is_convex_combination() {
        let ctx = memory();
        let mut w = Array2::zeros((1, 4));
        w[[0, 1]] = 1.0;
        let c = AdditiveAttention::context(&w, &ctx, &[1]);
        assert_eq!(c.row(0), ctx.slice(s![1, 1, ..]));
    }

    #[test]
    fn test_project_keys_shape() {
        let att = attention();
        assert_eq!(att.project_keys(&memory()).dim(), (2, 4, 5));
    }
}
