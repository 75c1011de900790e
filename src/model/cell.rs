//! Recurrent cells.
//!
//! A cell is a state transition `h' = f(x, h)` applied to a batch of rows.
//! The GRU follows the usual gating:
//!
//! ```text
//! r, u = sigmoid(W_g x + U_g h)
//! c    = tanh(W_c x + r ⊙ (U_c h))
//! h'   = u ⊙ h + (1 - u) ⊙ c
//! ```

use std::fmt::Debug;

use ndarray::{s, Array2, ArrayView2};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::linear::Linear;
use super::ops::sigmoid;

/// A batched recurrent state transition.
pub trait RecurrentCell: Debug + Send + Sync {
    fn input_dim(&self) -> usize;

    fn hidden_dim(&self) -> usize;

    /// `input: [n, input_dim]`, `state: [n, hidden_dim]` → new state `[n, hidden_dim]`.
    fn step(&self, input: ArrayView2<'_, f32>, state: ArrayView2<'_, f32>) -> Array2<f32>;

    fn param_count(&self) -> usize;
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GruCell {
    /// Input → [reset | update] gates: [2H, in]
    pub input_gates: Linear,

    /// State → [reset | update] gates: [2H, H]
    pub state_gates: Linear,

    /// Input → candidate: [H, in]
    pub input_candidate: Linear,

    /// State → candidate: [H, H]
    pub state_candidate: Linear,
}

impl GruCell {
    pub fn zeros(input_dim: usize, hidden_dim: usize) -> Self {
        Self {
            input_gates: Linear::zeros(input_dim, 2 * hidden_dim, true),
            state_gates: Linear::zeros(hidden_dim, 2 * hidden_dim, false),
            input_candidate: Linear::zeros(input_dim, hidden_dim, true),
            state_candidate: Linear::zeros(hidden_dim, hidden_dim, false),
        }
    }

    pub fn seeded<R: Rng + ?Sized>(input_dim: usize, hidden_dim: usize, std: f32, rng: &mut R) -> Self {
        Self {
            input_gates: Linear::seeded(input_dim, 2 * hidden_dim, true, std, rng),
            state_gates: Linear::seeded(hidden_dim, 2 * hidden_dim, false, std, rng),
            input_candidate: Linear::seeded(input_dim, hidden_dim, true, std, rng),
            state_candidate: Linear::seeded(hidden_dim, hidden_dim, false, std, rng),
        }
    }
}

impl RecurrentCell for GruCell {
    fn input_dim(&self) -> usize {
        self.input_gates.in_dim()
    }

    fn hidden_dim(&self) -> usize {
        self.state_candidate.out_dim()
    }

    fn step(&self, input: ArrayView2<'_, f32>, state: ArrayView2<'_, f32>) -> Array2<f32> {
        let h = self.hidden_dim();
        let gates = (self.input_gates.forward(input) + self.state_gates.forward(state)).mapv(sigmoid);
        let reset = gates.slice(s![.., ..h]);
        let update = gates.slice(s![.., h..]);

        let candidate = (self.input_candidate.forward(input)
            + &reset * &self.state_candidate.forward(state))
            .mapv(f32::tanh);

        &update * &state + &update.mapv(|u| 1.0 - u) * &candidate
    }

    fn param_count(&self) -> usize {
        self.input_gates.param_count()
            + self.state_gates.param_count()
            + self.input_candidate.param_count()
            + self.state_candidate.param_count()
    }
}
