//! The batch record handed to the model.

use std::ops::Range;

use super::instance::{BatchShape, InstanceStore};
use super::padding::{pad_to_longest, PaddedBatch};

/// Padded source plus whichever optional fields the corpus carries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    pub source: PaddedBatch,
    pub target: Option<PaddedBatch>,
    pub src_lang: Option<PaddedBatch>,
    pub tgt_lang: Option<PaddedBatch>,
}

impl Batch {
    /// Pad instances `store[range]` field by field.
    pub fn from_store(store: &InstanceStore, range: Range<usize>) -> Self {
        Self {
            source: pad_to_longest(&store.sources()[range.clone()]),
            target: store.targets().map(|t| pad_to_longest(&t[range.clone()])),
            src_lang: store.src_langs().map(|t| pad_to_longest(&t[range.clone()])),
            tgt_lang: store.tgt_langs().map(|t| pad_to_longest(&t[range])),
        }
    }

    pub fn shape(&self) -> BatchShape {
        BatchShape::from_flags(self.src_lang.is_some(), self.tgt_lang.is_some())
    }

    pub fn len(&self) -> usize {
        self.source.batch_size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_store_pads_each_field() {
        let store = InstanceStore::new(vec![vec![2, 7, 3], vec![2, 3]])
            .with_targets(vec![vec![2, 8, 8, 3], vec![2, 3]])
            .unwrap()
            .with_src_langs(vec![vec![40], vec![41]])
            .unwrap();
        let batch = Batch::from_store(&store, 0..2);
        assert_eq!(batch.shape(), BatchShape::SrcLangOnly);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.source.max_len(), 3);
        assert_eq!(batch.target.as_ref().unwrap().max_len(), 4);
        assert_eq!(batch.src_lang.as_ref().unwrap().row_tokens(1), vec![41]);
        assert!(batch.tgt_lang.is_none());
    }
}
