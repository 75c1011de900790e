//! Column-oriented storage for corpus instances.
//!
//! An instance is a source sequence plus up to three aligned companions:
//! the target sequence, a source-language tag and a target-language tag.
//! Every present field holds exactly one entry per instance, so a single
//! index addresses all of them.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A sequence of token ids.
pub type Sequence = Vec<u32>;

/// Which language-tag fields a batch carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchShape {
    NoLang,
    TgtLangOnly,
    SrcLangOnly,
    Both,
}

impl BatchShape {
    pub fn from_flags(has_src_lang: bool, has_tgt_lang: bool) -> Self {
        match (has_src_lang, has_tgt_lang) {
            (false, false) => Self::NoLang,
            (false, true) => Self::TgtLangOnly,
            (true, false) => Self::SrcLangOnly,
            (true, true) => Self::Both,
        }
    }

    pub fn has_src_lang(self) -> bool {
        matches!(self, Self::SrcLangOnly | Self::Both)
    }

    pub fn has_tgt_lang(self) -> bool {
        matches!(self, Self::TgtLangOnly | Self::Both)
    }
}

/// Borrowed view of one instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Example<'a> {
    pub source: &'a [u32],
    pub target: Option<&'a [u32]>,
    pub src_lang: Option<&'a [u32]>,
    pub tgt_lang: Option<&'a [u32]>,
}

/// Aligned instance fields.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstanceStore {
    sources: Vec<Sequence>,
    targets: Option<Vec<Sequence>>,
    src_langs: Option<Vec<Sequence>>,
    tgt_langs: Option<Vec<Sequence>>,
}

impl InstanceStore {
    /// Source-only store (translation input).
    pub fn new(sources: Vec<Sequence>) -> Self {
        Self {
            sources,
            ..Default::default()
        }
    }

    pub fn with_targets(mut self, targets: Vec<Sequence>) -> Result<Self, ConfigError> {
        self.check_aligned("targets", targets.len())?;
        self.targets = Some(targets);
        Ok(self)
    }

    pub fn with_src_langs(mut self, tags: Vec<Sequence>) -> Result<Self, ConfigError> {
        self.check_aligned("src_langs", tags.len())?;
        self.src_langs = Some(tags);
        Ok(self)
    }

    pub fn with_tgt_langs(mut self, tags: Vec<Sequence>) -> Result<Self, ConfigError> {
        self.check_aligned("tgt_langs", tags.len())?;
        self.tgt_langs = Some(tags);
        Ok(self)
    }

    fn check_aligned(&self, field: &'static str, len: usize) -> Result<(), ConfigError> {
        if len != self.sources.len() {
            return Err(ConfigError::MisalignedField {
                field,
                len,
                expected: self.sources.len(),
            });
        }
        Ok(())
    }

    /// An empty store carrying the same optional fields as `self`.
    pub fn empty_like(&self) -> Self {
        Self {
            sources: Vec::new(),
            targets: self.targets.as_ref().map(|_| Vec::new()),
            src_langs: self.src_langs.as_ref().map(|_| Vec::new()),
            tgt_langs: self.tgt_langs.as_ref().map(|_| Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn sources(&self) -> &[Sequence] {
        &self.sources
    }

    pub fn targets(&self) -> Option<&[Sequence]> {
        self.targets.as_deref()
    }

    pub fn src_langs(&self) -> Option<&[Sequence]> {
        self.src_langs.as_deref()
    }

    pub fn tgt_langs(&self) -> Option<&[Sequence]> {
        self.tgt_langs.as_deref()
    }

    pub fn has_targets(&self) -> bool {
        self.targets.is_some()
    }

    pub fn shape(&self) -> BatchShape {
        BatchShape::from_flags(self.src_langs.is_some(), self.tgt_langs.is_some())
    }

    pub fn example(&self, index: usize) -> Option<Example<'_>> {
        let source = self.sources.get(index)?;
        Some(Example {
            source,
            target: self.targets.as_ref().map(|t| t[index].as_slice()),
            src_lang: self.src_langs.as_ref().map(|t| t[index].as_slice()),
            tgt_lang: self.tgt_langs.as_ref().map(|t| t[index].as_slice()),
        })
    }

    /// Copy of the instances in `range`.
    pub fn slice(&self, range: Range<usize>) -> Self {
        let mut out = self.empty_like();
        out.append_range(self, range);
        out
    }

    /// Append the instances `other[range]` to every field present in `self`.
    pub fn append_range(&mut self, other: &Self, range: Range<usize>) {
        self.sources.extend_from_slice(&other.sources[range.clone()]);
        extend_field(&mut self.targets, &other.targets, range.clone());
        extend_field(&mut self.src_langs, &other.src_langs, range.clone());
        extend_field(&mut self.tgt_langs, &other.tgt_langs, range);
    }

    /// Reorder all fields so that new position `i` holds old instance `order[i]`.
    ///
    /// `order` must be a permutation of `0..len`.
    pub fn permute(&mut self, order: &[usize]) {
        debug_assert_eq!(order.len(), self.len());
        permute_field(&mut self.sources, order);
        for field in [&mut self.targets, &mut self.src_langs, &mut self.tgt_langs] {
            if let Some(values) = field {
                permute_field(values, order);
            }
        }
    }
}

fn extend_field(dst: &mut Option<Vec<Sequence>>, src: &Option<Vec<Sequence>>, range: Range<usize>) {
    if let (Some(dst), Some(src)) = (dst, src) {
        dst.extend_from_slice(&src[range]);
    }
}

fn permute_field(values: &mut Vec<Sequence>, order: &[usize]) {
    let mut old = std::mem::take(values);
    *values = order.iter().map(|&i| std::mem::take(&mut old[i])).collect();
}
