//! Right-padding of variable-length sequences into rectangular matrices.

use ndarray::Array2;

use crate::config::PAD;

/// A padded token matrix and its 1-based position matrix.
///
/// `positions[[i, j]] == j + 1` wherever `tokens[[i, j]] != PAD`, otherwise 0.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaddedBatch {
    pub tokens: Array2<u32>,
    pub positions: Array2<u32>,
}

impl PaddedBatch {
    pub fn batch_size(&self) -> usize {
        self.tokens.nrows()
    }

    pub fn max_len(&self) -> usize {
        self.tokens.ncols()
    }

    /// Unpadded length of each row, read off the position matrix.
    pub fn lengths(&self) -> Vec<usize> {
        self.positions
            .outer_iter()
            .map(|row| row.iter().copied().max().unwrap_or(0) as usize)
            .collect()
    }

    /// Tokens of row `i` up to its first PAD.
    pub fn row_tokens(&self, i: usize) -> Vec<u32> {
        self.tokens
            .row(i)
            .iter()
            .copied()
            .take_while(|&t| t != PAD)
            .collect()
    }

    /// Number of PAD cells in the token matrix.
    pub fn pad_count(&self) -> usize {
        self.tokens.iter().filter(|&&t| t == PAD).count()
    }
}

/// Pad `insts` with PAD up to the longest one.
pub fn pad_to_longest<S: AsRef<[u32]>>(insts: &[S]) -> PaddedBatch {
    let max_len = insts.iter().map(|s| s.as_ref().len()).max().unwrap_or(0);
    let mut tokens = Array2::from_elem((insts.len(), max_len), PAD);
    let mut positions = Array2::zeros((insts.len(), max_len));

    for (i, inst) in insts.iter().enumerate() {
        for (j, &tok) in inst.as_ref().iter().enumerate() {
            tokens[[i, j]] = tok;
            if tok != PAD {
                positions[[i, j]] = j as u32 + 1;
            }
        }
    }

    PaddedBatch { tokens, positions }
}
