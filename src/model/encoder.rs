//! Bidirectional recurrent encoder.
//!
//! Each source row is run forward and backward over its unpadded prefix; the
//! two state sequences are concatenated per position. Positions past a row's
//! length stay zero. Rows are independent, so they are encoded in parallel.

use ndarray::{s, Array2, Array3, Axis};
use rayon::prelude::*;

use crate::config::UNK;
use crate::data::padding::PaddedBatch;

use super::params::{CellId, ParamId, ParamStore};

#[derive(Clone, Copy, Debug)]
pub struct Encoder {
    pub embedding: ParamId,
    pub forward_cell: CellId,
    pub backward_cell: CellId,
}

impl Encoder {
    /// Width of each context vector (both directions).
    pub fn context_dim(&self, params: &ParamStore) -> usize {
        params.cell(self.forward_cell).hidden_dim() + params.cell(self.backward_cell).hidden_dim()
    }

    /// Encode a padded source batch into `[B, T, C]` plus row lengths.
    pub fn encode(&self, params: &ParamStore, source: &PaddedBatch) -> (Array3<f32>, Vec<usize>) {
        let lengths = source.lengths();
        let (batch, max_len) = source.tokens.dim();
        let width = self.context_dim(params);

        let rows: Vec<Array2<f32>> = (0..batch)
            .into_par_iter()
            .map(|b| self.encode_row(params, &source.row_tokens(b), max_len))
            .collect();

        let mut context = Array3::zeros((batch, max_len, width));
        for (b, row) in rows.iter().enumerate() {
            context.index_axis_mut(Axis(0), b).assign(row);
        }
        tracing::trace!(batch, max_len, "encoded source batch");
        (context, lengths)
    }

    fn encode_row(&self, params: &ParamStore, tokens: &[u32], max_len: usize) -> Array2<f32> {
        let fwd = params.cell(self.forward_cell);
        let bwd = params.cell(self.backward_cell);
        let hf = fwd.hidden_dim();
        let hb = bwd.hidden_dim();
        let mut out = Array2::zeros((max_len, hf + hb));

        let embedded: Vec<Array2<f32>> = tokens
            .iter()
            .map(|&t| params.row(self.embedding, t, UNK).to_owned().insert_axis(Axis(0)))
            .collect();

        let mut state = Array2::zeros((1, hf));
        for (t, x) in embedded.iter().enumerate() {
            state = fwd.step(x.view(), state.view());
            out.slice_mut(s![t, ..hf]).assign(&state.row(0));
        }

        let mut state = Array2::zeros((1, hb));
        for (t, x) in embedded.iter().enumerate().rev() {
            state = bwd.step(x.view(), state.view());
            out.slice_mut(s![t, hf..]).assign(&state.row(0));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::padding::pad_to_longest;
    use crate::model::cell::GruCell;
    use crate::model::linear::gaussian;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn encoder(store: &mut ParamStore) -> Encoder {
        let mut rng = StdRng::seed_from_u64(3);
        let embedding = store.insert("src_emb", gaussian(12, 4, 0.5, &mut rng));
        let forward_cell = store.insert_cell(GruCell::seeded(4, 3, 0.5, &mut rng));
        let backward_cell = store.insert_cell(GruCell::seeded(4, 3, 0.5, &mut rng));
        Encoder {
            embedding,
            forward_cell,
            backward_cell,
        }
    }

    #[test]
    fn test_padding_positions_are_zero() {
        let mut store = ParamStore::new();
        let enc = encoder(&mut store);
        let src = pad_to_longest(&[vec![2, 5, 6, 3], vec![2, 7, 3]]);
        let (ctx, lengths) = enc.encode(&store, &src);

        assert_eq!(ctx.dim(), (2, 4, 6));
        assert_eq!(lengths, vec![4, 3]);
        assert!(ctx.slice(s![1, 3, ..]).iter().all(|&v| v == 0.0));
        assert!(ctx.slice(s![1, 2, ..]).iter().any(|&v| v != 0.0));
    }

    #[test]
    fn test_rows_do_not_depend_on_batch_padding() {
        let mut store = ParamStore::new();
        let enc = encoder(&mut store);
        let alone = enc.encode(&store, &pad_to_longest(&[vec![2, 7, 3]])).0;
        let padded = enc
            .encode(&store, &pad_to_longest(&[vec![2, 5, 6, 8, 3], vec![2, 7, 3]]))
            .0;
        for t in 0..3 {
            for c in 0..6 {
                assert!((alone[[0, t, c]] - padded[[1, t, c]]).abs() < 1e-6);
            }
        }
    }
}
