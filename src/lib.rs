//! # polynmt
//!
//! Multilingual neural machine translation with an attention-based recurrent
//! decoder, built around a balanced multi-corpus batch scheduler.
//!
//! ## Components
//!
//! 1. **Balanced scheduling**: every language pair contributes an equal share
//!    of each maxi-batch; batches inside a maxi-batch are length-sorted
//! 2. **Padding**: right-padded token matrices with 1-based position matrices
//! 3. **Encoder**: bidirectional GRU over the padded source
//! 4. **Attention decoder**: two-stage GRU with additive attention and an
//!    optional target-language one-hot
//! 5. **Search**: batched greedy decoding and length-normalised beam search
//!
//! ## Data flow
//!
//! ```text
//! text files ─► reader ─► pools ─► scheduler ─► Batch ─► encoder ─► SourceMemory
//!                                                                      │
//!                                   tokens ◄─ greedy / beam ◄─ decoder step
//! ```

pub mod data;
pub mod decoding;
pub mod error;
pub mod eval;
pub mod model;

/// Reserved ids, defaults and run configuration.
pub mod config {
    use std::path::Path;

    use anyhow::Context;
    use serde::{Deserialize, Serialize};

    use crate::data::scheduler::SchedulerConfig;
    use crate::decoding::step::DecodeConfig;
    use crate::model::nmt::ModelConfig;

    /// Padding id.
    pub const PAD: u32 = 0;

    /// Unknown-word id.
    pub const UNK: u32 = 1;

    /// Beginning-of-sentence id.
    pub const BOS: u32 = 2;

    /// End-of-sentence id.
    pub const EOS: u32 = 3;

    pub const PAD_WORD: &str = "<blank>";
    pub const UNK_WORD: &str = "<unk>";
    pub const BOS_WORD: &str = "<s>";
    pub const EOS_WORD: &str = "</s>";

    /// Instances per batch.
    pub const DEFAULT_BATCH_SIZE: usize = 64;

    /// Batches per maxi-batch.
    pub const DEFAULT_MAXIBATCH_SIZE: usize = 20;

    /// Shuffle / initialisation seed.
    pub const DEFAULT_SEED: u64 = 1234;

    /// Words per sentence kept by the readers.
    pub const DEFAULT_MAX_SENT_LEN: usize = 50;

    /// Upper bound on decoding steps.
    pub const DEFAULT_MAX_DECODE_STEPS: usize = 100;

    pub const DEFAULT_BEAM_WIDTH: usize = 5;

    /// Length-penalty exponent α.
    pub const DEFAULT_LENGTH_ALPHA: f32 = 0.6;

    /// Offset in the length penalty `((BASE + len) / (BASE + 1))^α`.
    pub const LENGTH_PENALTY_BASE: f32 = 5.0;

    /// Word embedding width.
    pub const DEFAULT_D_WORD_VEC: usize = 620;

    /// Recurrent hidden width.
    pub const DEFAULT_D_MODEL: usize = 1000;

    /// Loss cap applied before exponentiating into perplexity.
    pub const PPL_LOSS_CAP: f64 = 100.0;

    /// Everything a run needs, loadable from one JSON file.
    ///
    /// Missing sections fall back to their defaults.
    #[derive(Clone, Debug, Default, Serialize, Deserialize)]
    #[serde(default)]
    pub struct RunConfig {
        pub scheduler: SchedulerConfig,
        pub model: ModelConfig,
        pub decode: DecodeConfig,
    }

    impl RunConfig {
        pub fn load(path: &Path) -> anyhow::Result<Self> {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
        }
    }

}
