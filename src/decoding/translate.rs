//! Batch translation: encode, search, render.

use std::io::Write;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::data::batch::Batch;
use crate::data::lang::Languages;
use crate::data::scheduler::BatchScheduler;
use crate::data::vocab::Vocabulary;
use crate::error::ConfigError;
use crate::model::nmt::NmtModel;

use super::beam::beam_search;
use super::greedy::greedy_search;
use super::step::{DecodeConfig, Decoded};

/// Search strategy.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecodeStrategy {
    Greedy,
    Beam { width: usize, alpha: f32 },
}

impl DecodeStrategy {
    /// Beam search when the configured width is above 1, greedy otherwise.
    pub fn from_config(config: &DecodeConfig) -> Self {
        if config.beam_width > 1 {
            Self::Beam {
                width: config.beam_width,
                alpha: config.alpha,
            }
        } else {
            Self::Greedy
        }
    }
}

/// Counters from a translation run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TranslateStats {
    pub sentences: usize,
    pub batches: usize,
    /// Sentences cut off by the step bound.
    pub unterminated: usize,
}

pub struct Translator<'a> {
    model: &'a NmtModel,
    tgt_vocab: &'a Vocabulary,
    languages: Option<&'a Languages>,
    strategy: DecodeStrategy,
    max_steps: usize,
    /// Start decoding from each row's target-language tag instead of BOS.
    lang_as_start: bool,
}

impl<'a> Translator<'a> {
    pub fn new(model: &'a NmtModel, tgt_vocab: &'a Vocabulary, strategy: DecodeStrategy, max_steps: usize) -> Self {
        Self {
            model,
            tgt_vocab,
            languages: None,
            strategy,
            max_steps,
            lang_as_start: false,
        }
    }

    /// Feed source- and target-language one-hots built from `languages` to
    /// the model.
    pub fn with_languages(mut self, languages: &'a Languages) -> Self {
        self.languages = Some(languages);
        self
    }

    pub fn with_lang_as_start(mut self, enabled: bool) -> Self {
        self.lang_as_start = enabled;
        self
    }

    /// Decode every row of `batch`, in row order.
    pub fn translate_batch(&self, batch: &Batch) -> Result<Vec<Decoded>, ConfigError> {
        let langs = self
            .languages
            .map(|l| l.one_hots(batch))
            .unwrap_or_default();
        let memory = self.model.encode(&batch.source, langs)?;

        let start: Option<Vec<u32>> = match (&batch.tgt_lang, self.lang_as_start) {
            (Some(tags), true) => Some(tags.tokens.column(0).to_vec()),
            _ => None,
        };

        let decoded = match self.strategy {
            DecodeStrategy::Greedy => {
                let config = DecodeConfig {
                    max_steps: self.max_steps,
                    beam_width: 1,
                    ..Default::default()
                };
                greedy_search(self.model, &memory, &config, start.as_deref())?
            }
            DecodeStrategy::Beam { width, alpha } => {
                if width == 0 {
                    return Err(ConfigError::ZeroBeamWidth);
                }
                let config = DecodeConfig {
                    max_steps: self.max_steps,
                    beam_width: width,
                    alpha,
                };
                beam_search(self.model, &memory, &config, start.as_deref())?
            }
        };
        Ok(decoded)
    }

    /// Words of a decoded sentence joined by spaces.
    pub fn render(&self, decoded: &Decoded) -> String {
        self.tgt_vocab.decode(&decoded.tokens)
    }

    /// Translate a whole epoch of `scheduler`, one output line per sentence.
    ///
    /// `progress` is called with the size of each finished batch.
    pub fn translate_all<W: Write>(
        &self,
        scheduler: &mut BatchScheduler,
        out: &mut W,
        mut progress: impl FnMut(usize),
    ) -> anyhow::Result<TranslateStats> {
        let mut stats = TranslateStats::default();
        for batch in scheduler.epoch() {
            let batch = batch?;
            for decoded in self.translate_batch(&batch)? {
                if !decoded.terminated {
                    stats.unterminated += 1;
                }
                writeln!(out, "{}", self.render(&decoded)).context("writing translation")?;
                stats.sentences += 1;
            }
            stats.batches += 1;
            progress(batch.len());
        }
        out.flush().context("flushing translation output")?;

        if stats.unterminated > 0 {
            tracing::warn!(
                count = stats.unterminated,
                max_steps = self.max_steps,
                "sentences hit the step bound before EOS"
            );
        }
        tracing::info!(sentences = stats.sentences, batches = stats.batches, "translation finished");
        Ok(stats)
    }
}
