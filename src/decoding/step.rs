//! The step interface shared by greedy and beam search.

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::config::{BOS, DEFAULT_BEAM_WIDTH, DEFAULT_LENGTH_ALPHA, DEFAULT_MAX_DECODE_STEPS};
use crate::error::ConfigError;

/// Logits and new hidden state for a batch of query rows.
#[derive(Clone, Debug)]
pub struct StepOutput {
    /// `[n, V]`
    pub logits: Array2<f32>,

    /// `[n, H]`
    pub hidden: Array2<f32>,
}

/// Anything that can advance a decoder by one token.
///
/// `rows[i]` names the memory row (source sentence) query `i` belongs to, so
/// several hypotheses of one sentence can be advanced together.
pub trait StepDecoder {
    type Memory;

    fn vocab_size(&self) -> usize;

    /// Initial hidden state, one row per memory row.
    fn init_hidden(&self, memory: &Self::Memory) -> Array2<f32>;

    fn step(
        &self,
        memory: &Self::Memory,
        rows: &[usize],
        tokens: &[u32],
        hidden: ArrayView2<'_, f32>,
    ) -> StepOutput;
}

/// Search limits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    /// Upper bound on generated tokens.
    pub max_steps: usize,

    /// Beam width; 1 reproduces greedy search.
    pub beam_width: usize,

    /// Length-penalty exponent.
    pub alpha: f32,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_DECODE_STEPS,
            beam_width: DEFAULT_BEAM_WIDTH,
            alpha: DEFAULT_LENGTH_ALPHA,
        }
    }
}

/// One decoded sentence. `tokens` never contains EOS.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Decoded {
    pub tokens: Vec<u32>,

    /// False when the step bound was hit before EOS.
    pub terminated: bool,
}

/// Per-row start tokens: the supplied ones, or BOS everywhere.
pub(crate) fn start_tokens(start: Option<&[u32]>, batch: usize) -> Result<Vec<u32>, ConfigError> {
    match start {
        Some(tokens) if tokens.len() != batch => Err(ConfigError::StartTokens {
            expected: batch,
            found: tokens.len(),
        }),
        Some(tokens) => Ok(tokens.to_vec()),
        None => Ok(vec![BOS; batch]),
    }
}
