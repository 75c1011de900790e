//! Parameter arena.
//!
//! Embedding tables, output projections and recurrent cells live in one
//! [`ParamStore`] and are referenced by typed handles. Two modules share a
//! parameter by holding the same handle, so tied embeddings and a cell reused
//! by encoder and decoder are a single allocation.

use ndarray::{Array2, ArrayView1};

use super::cell::RecurrentCell;

/// Handle to a matrix in a [`ParamStore`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ParamId(usize);

/// Handle to a recurrent cell in a [`ParamStore`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CellId(usize);

#[derive(Debug, Default)]
pub struct ParamStore {
    matrices: Vec<Array2<f32>>,
    names: Vec<String>,
    cells: Vec<Box<dyn RecurrentCell>>,
}

impl ParamStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Array2<f32>) -> ParamId {
        self.matrices.push(value);
        self.names.push(name.into());
        ParamId(self.matrices.len() - 1)
    }

    pub fn insert_cell(&mut self, cell: impl RecurrentCell + 'static) -> CellId {
        self.cells.push(Box::new(cell));
        CellId(self.cells.len() - 1)
    }

    pub fn get(&self, id: ParamId) -> &Array2<f32> {
        &self.matrices[id.0]
    }

    pub fn get_mut(&mut self, id: ParamId) -> &mut Array2<f32> {
        &mut self.matrices[id.0]
    }

    pub fn name(&self, id: ParamId) -> &str {
        &self.names[id.0]
    }

    pub fn cell(&self, id: CellId) -> &dyn RecurrentCell {
        self.cells[id.0].as_ref()
    }

    /// Embedding row for `token`; out-of-range ids fall back to `fallback`.
    pub fn row(&self, id: ParamId, token: u32, fallback: u32) -> ArrayView1<'_, f32> {
        let table = self.get(id);
        let idx = if (token as usize) < table.nrows() {
            token
        } else {
            fallback
        };
        table.row(idx as usize)
    }

    pub fn num_matrices(&self) -> usize {
        self.matrices.len()
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    /// Scalar parameters, each shared block counted once.
    pub fn param_count(&self) -> usize {
        self.matrices.iter().map(Array2::len).sum::<usize>()
            + self.cells.iter().map(|c| c.param_count()).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::cell::GruCell;

    #[test]
    fn test_shared_handle_is_one_allocation() {
        let mut store = ParamStore::new();
        let emb = store.insert("emb", Array2::zeros((10, 4)));
        let tied = emb;
        store.get_mut(emb)[[3, 1]] = 2.5;
        assert_eq!(store.get(tied)[[3, 1]], 2.5);
        assert_eq!(store.num_matrices(), 1);
        assert_eq!(store.name(tied), "emb");
    }

    #[test]
    fn test_row_fallback() {
        let mut store = ParamStore::new();
        let emb = store.insert("emb", Array2::from_shape_fn((3, 2), |(i, _)| i as f32));
        assert_eq!(store.row(emb, 2, 1)[0], 2.0);
        assert_eq!(store.row(emb, 40, 1)[0], 1.0);
    }

    #[test]
    fn test_param_count_counts_cells() {
        let mut store = ParamStore::new();
        store.insert("w", Array2::zeros((2, 3)));
        let cell = GruCell::zeros(3, 2);
        let expected = 6 + cell.param_count();
        store.insert_cell(cell);
        assert_eq!(store.param_count(), expected);
        assert_eq!(store.num_cells(), 1);
    }
}
