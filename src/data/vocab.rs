//! Word ↔ id vocabularies.
//!
//! On disk a vocabulary is a JSON object mapping words to ids. Ids must be
//! dense (`0..len`) and the four reserved words must sit at their fixed ids.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::config::{BOS, BOS_WORD, EOS, EOS_WORD, PAD, PAD_WORD, UNK, UNK_WORD};
use crate::error::DataError;

use super::instance::Sequence;

const RESERVED: [(&str, u32); 4] = [
    (PAD_WORD, PAD),
    (UNK_WORD, UNK),
    (BOS_WORD, BOS),
    (EOS_WORD, EOS),
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vocabulary {
    word2idx: HashMap<String, u32>,
    idx2word: Vec<String>,
}

impl Vocabulary {
    /// Validate and index a word → id map.
    pub fn from_map(word2idx: HashMap<String, u32>) -> Result<Self, DataError> {
        for (token, expected) in RESERVED {
            let found = word2idx.get(token).copied();
            if found != Some(expected) {
                return Err(DataError::ReservedId {
                    token,
                    expected,
                    found,
                });
            }
        }

        let mut slots: Vec<Option<String>> = vec![None; word2idx.len()];
        for (word, &id) in &word2idx {
            match slots.get_mut(id as usize) {
                Some(slot) => *slot = Some(word.clone()),
                None => return Err(DataError::SparseIds(id)),
            }
        }
        let mut idx2word = Vec::with_capacity(slots.len());
        for (id, slot) in slots.into_iter().enumerate() {
            idx2word.push(slot.ok_or(DataError::SparseIds(id as u32))?);
        }

        Ok(Self { word2idx, idx2word })
    }

    /// Build from tokenised sentences.
    ///
    /// Words occurring more than `min_count` times are kept. When `max_size`
    /// is set, the most frequent words are kept instead (reserved words
    /// included in the count) and `min_count` is ignored. Ties are broken
    /// alphabetically so the result does not depend on hash order.
    pub fn build<S: AsRef<str>>(sentences: &[Vec<S>], min_count: usize, max_size: Option<usize>) -> Self {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for sent in sentences {
            for word in sent {
                *counts.entry(word.as_ref()).or_default() += 1;
            }
        }
        let mut ranked: Vec<(&str, usize)> = counts
            .into_iter()
            .filter(|(w, _)| !RESERVED.iter().any(|(r, _)| r == w))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        let kept: Vec<&str> = match max_size {
            Some(size) => ranked
                .iter()
                .take(size.saturating_sub(RESERVED.len()))
                .map(|(w, _)| *w)
                .collect(),
            None => ranked
                .iter()
                .filter(|(_, c)| *c > min_count)
                .map(|(w, _)| *w)
                .collect(),
        };

        let mut idx2word: Vec<String> = vec![String::new(); RESERVED.len()];
        for (word, id) in RESERVED {
            idx2word[id as usize] = word.to_string();
        }
        idx2word.extend(kept.iter().map(|w| w.to_string()));
        let word2idx = idx2word
            .iter()
            .enumerate()
            .map(|(i, w)| (w.clone(), i as u32))
            .collect();

        tracing::info!(
            distinct = ranked.len(),
            kept = idx2word.len(),
            "vocabulary built"
        );
        Self { word2idx, idx2word }
    }

    pub fn load(path: &Path) -> Result<Self, DataError> {
        let text = fs::read_to_string(path).map_err(|e| DataError::io(path, e))?;
        let map: HashMap<String, u32> =
            serde_json::from_str(&text).map_err(|source| DataError::VocabFormat {
                path: path.to_path_buf(),
                source,
            })?;
        let vocab = Self::from_map(map)?;
        tracing::info!(path = %path.display(), size = vocab.len(), "loaded vocabulary");
        Ok(vocab)
    }

    pub fn save(&self, path: &Path) -> Result<(), DataError> {
        let text = serde_json::to_string_pretty(&self.word2idx).map_err(|source| {
            DataError::VocabFormat {
                path: path.to_path_buf(),
                source,
            }
        })?;
        fs::write(path, text).map_err(|e| DataError::io(path, e))
    }

    pub fn len(&self) -> usize {
        self.idx2word.len()
    }

    pub fn is_empty(&self) -> bool {
        self.idx2word.is_empty()
    }

    /// Id of `word`, or UNK.
    pub fn id(&self, word: &str) -> u32 {
        self.word2idx.get(word).copied().unwrap_or(UNK)
    }

    pub fn word(&self, id: u32) -> Option<&str> {
        self.idx2word.get(id as usize).map(String::as_str)
    }

    /// Ids of running text. Control words (PAD, BOS, EOS) in the text map to
    /// UNK; only the reader places those ids.
    pub fn encode<S: AsRef<str>>(&self, words: &[S]) -> Sequence {
        words
            .iter()
            .map(|w| match self.id(w.as_ref()) {
                PAD | BOS | EOS => UNK,
                id => id,
            })
            .collect()
    }

    /// Space-joined words; ids outside the vocabulary render as the UNK word.
    pub fn decode(&self, ids: &[u32]) -> String {
        ids.iter()
            .map(|&id| self.word(id).unwrap_or(UNK_WORD))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
