//! Language tags: splitting a tagged corpus into per-pair pools and mapping
//! tags to dense one-hot indices for the model.

use std::collections::HashMap;

use ndarray::Array2;

use super::batch::Batch;
use super::instance::{InstanceStore, Sequence};
use super::padding::PaddedBatch;

/// Split a corpus into pools at every change of target-language tag.
///
/// Runs are contiguous: a tag that reappears after a different tag starts a
/// new pool. A corpus without target tags comes back as a single pool.
pub fn split_by_target_language(store: InstanceStore) -> Vec<InstanceStore> {
    let Some(tags) = store.tgt_langs() else {
        return vec![store];
    };
    if tags.is_empty() {
        return vec![store];
    }

    let mut pools = Vec::new();
    let mut start = 0;
    for i in 1..tags.len() {
        if tags[i] != tags[i - 1] {
            pools.push(store.slice(start..i));
            start = i;
        }
    }
    pools.push(store.slice(start..tags.len()));

    tracing::info!(
        pools = pools.len(),
        sizes = ?pools.iter().map(InstanceStore::len).collect::<Vec<_>>(),
        "split corpus by target language"
    );
    pools
}

/// Dense indices for language tags, keyed on the first token of each tag.
///
/// Indices are assigned in first-seen order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LanguageIndex {
    index: HashMap<u32, usize>,
    tokens: Vec<u32>,
}

impl LanguageIndex {
    pub fn build(tags: &[Sequence]) -> Self {
        let mut out = Self::default();
        for tag in tags {
            if let Some(&tok) = tag.first() {
                out.insert(tok);
            }
        }
        out
    }

    fn insert(&mut self, token: u32) -> usize {
        if let Some(&idx) = self.index.get(&token) {
            return idx;
        }
        let idx = self.tokens.len();
        self.index.insert(token, idx);
        self.tokens.push(token);
        idx
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn index_of(&self, tag: &[u32]) -> Option<usize> {
        tag.first().and_then(|t| self.index.get(t).copied())
    }

    /// Row `i` is the one-hot encoding of row `i`'s tag; all zeros when the
    /// tag is unknown.
    pub fn one_hot_batch(&self, tags: &PaddedBatch) -> Array2<f32> {
        let mut out = Array2::zeros((tags.batch_size(), self.len()));
        for (i, row) in tags.tokens.outer_iter().enumerate() {
            if let Some(&idx) = row.get(0).and_then(|t| self.index.get(t)) {
                out[[i, idx]] = 1.0;
            }
        }
        out
    }
}

/// Per-row language one-hots of one batch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LanguageCodes {
    /// `[B, source languages]`
    pub src: Option<Array2<f32>>,

    /// `[B, target languages]`
    pub tgt: Option<Array2<f32>>,
}

/// Indexes for the source and target tag fields of a corpus.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Languages {
    pub src: Option<LanguageIndex>,
    pub tgt: Option<LanguageIndex>,
}

impl Languages {
    /// Index every tag field present in `store`.
    pub fn from_store(store: &InstanceStore) -> Self {
        Self {
            src: store.src_langs().map(LanguageIndex::build),
            tgt: store.tgt_langs().map(LanguageIndex::build),
        }
    }

    pub fn src_width(&self) -> usize {
        self.src.as_ref().map_or(0, LanguageIndex::len)
    }

    pub fn tgt_width(&self) -> usize {
        self.tgt.as_ref().map_or(0, LanguageIndex::len)
    }

    /// One-hots for each side that has both an index and tags in `batch`.
    pub fn one_hots(&self, batch: &Batch) -> LanguageCodes {
        LanguageCodes {
            src: encode_side(self.src.as_ref(), batch.src_lang.as_ref()),
            tgt: encode_side(self.tgt.as_ref(), batch.tgt_lang.as_ref()),
        }
    }
}

fn encode_side(index: Option<&LanguageIndex>, tags: Option<&PaddedBatch>) -> Option<Array2<f32>> {
    match (index, tags) {
        (Some(index), Some(tags)) => Some(index.one_hot_batch(tags)),
        _ => None,
    }
}
