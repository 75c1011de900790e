//! The full encoder–decoder model and its configuration.

use ndarray::{Array2, Array3, ArrayView2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_D_MODEL, DEFAULT_D_WORD_VEC, DEFAULT_SEED};
use crate::data::lang::LanguageCodes;
use crate::data::padding::PaddedBatch;
use crate::decoding::step::{StepDecoder, StepOutput};
use crate::error::ConfigError;

use super::cell::GruCell;
use super::decoder::{AttentionDecoder, DecoderDims, SourceMemory};
use super::encoder::Encoder;
use super::linear::gaussian;
use super::params::ParamStore;

/// Reserved ids occupy the first four vocabulary slots.
const MIN_VOCAB: usize = 5;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub src_vocab_size: usize,
    pub tgt_vocab_size: usize,

    /// Word embedding width.
    pub d_word_vec: usize,

    /// Recurrent state width (per direction in the encoder).
    pub d_model: usize,

    /// Tie the target embedding and the output projection.
    pub proj_share_weight: bool,

    /// Share one embedding table between source and target.
    pub embs_share_weight: bool,

    /// Run the encoder with the decoder's first recurrent cell.
    pub share_enc_dec: bool,

    /// Width of the target-language one-hot fed to the decoder; 0 disables it.
    pub tgt_lang_dim: usize,

    /// Width of the source-language one-hot fed to the initial state; 0
    /// disables it.
    pub src_lang_dim: usize,

    /// Standard deviation of the Gaussian initialisation.
    pub init_std: f32,

    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            src_vocab_size: 0,
            tgt_vocab_size: 0,
            d_word_vec: DEFAULT_D_WORD_VEC,
            d_model: DEFAULT_D_MODEL,
            proj_share_weight: true,
            embs_share_weight: false,
            share_enc_dec: false,
            tgt_lang_dim: 0,
            src_lang_dim: 0,
            init_std: 0.01,
            seed: DEFAULT_SEED,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.src_vocab_size < MIN_VOCAB || self.tgt_vocab_size < MIN_VOCAB {
            return Err(ConfigError::Model(format!(
                "vocabularies need at least {MIN_VOCAB} entries (got {} / {})",
                self.src_vocab_size, self.tgt_vocab_size
            )));
        }
        if self.d_word_vec == 0 || self.d_model == 0 {
            return Err(ConfigError::Model("layer widths must be non-zero".into()));
        }
        if self.embs_share_weight && self.src_vocab_size != self.tgt_vocab_size {
            return Err(ConfigError::Model(
                "a shared embedding table needs equal source and target vocabularies".into(),
            ));
        }
        if !(self.init_std.is_finite() && self.init_std > 0.0) {
            return Err(ConfigError::Model(format!(
                "init_std must be positive, got {}",
                self.init_std
            )));
        }
        Ok(())
    }
}

pub struct NmtModel {
    config: ModelConfig,
    params: ParamStore,
    encoder: Encoder,
    decoder: AttentionDecoder,
}

impl NmtModel {
    /// Build a model with seeded Gaussian weights.
    pub fn new(config: ModelConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let std = config.init_std;
        let (e, h) = (config.d_word_vec, config.d_model);
        let mut params = ParamStore::new();

        let src_emb = params.insert("src_emb", gaussian(config.src_vocab_size, e, std, &mut rng));
        let tgt_emb = if config.embs_share_weight {
            src_emb
        } else {
            params.insert("tgt_emb", gaussian(config.tgt_vocab_size, e, std, &mut rng))
        };
        let output = if config.proj_share_weight {
            tgt_emb
        } else {
            params.insert("out_proj", gaussian(config.tgt_vocab_size, e, std, &mut rng))
        };

        let input_cell = params.insert_cell(GruCell::seeded(e, h, std, &mut rng));
        let (forward_cell, backward_cell) = if config.share_enc_dec {
            (input_cell, input_cell)
        } else {
            (
                params.insert_cell(GruCell::seeded(e, h, std, &mut rng)),
                params.insert_cell(GruCell::seeded(e, h, std, &mut rng)),
            )
        };
        let encoder = Encoder {
            embedding: src_emb,
            forward_cell,
            backward_cell,
        };

        let context_dim = encoder.context_dim(&params);
        let context_cell = params.insert_cell(GruCell::seeded(context_dim + config.tgt_lang_dim, h, std, &mut rng));
        let dims = DecoderDims {
            word_dim: e,
            hidden_dim: h,
            context_dim,
            tgt_lang_dim: config.tgt_lang_dim,
            src_lang_dim: config.src_lang_dim,
        };
        let decoder = AttentionDecoder::seeded(tgt_emb, output, input_cell, context_cell, dims, std, &mut rng);

        let model = Self {
            config,
            params,
            encoder,
            decoder,
        };
        tracing::info!(
            params = model.param_count(),
            d_word_vec = e,
            d_model = h,
            tied_output = model.config.proj_share_weight,
            shared_embeddings = model.config.embs_share_weight,
            "model initialised"
        );
        Ok(model)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn params(&self) -> &ParamStore {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut ParamStore {
        &mut self.params
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    pub fn decoder(&self) -> &AttentionDecoder {
        &self.decoder
    }

    /// Scalar parameter count, shared blocks counted once plus the
    /// decoder's dense layers.
    pub fn param_count(&self) -> usize {
        let d = &self.decoder;
        self.params.param_count()
            + d.attention.state_proj.param_count()
            + d.attention.context_proj.param_count()
            + d.attention.score.param_count()
            + d.init_proj.param_count()
            + d.emb_to_out.param_count()
            + d.ctx_to_out.param_count()
            + d.state_to_out.param_count()
    }

    /// Encode a padded source batch. Each one-hot in `langs` must match the
    /// configured width of its side; a side the model was built without is
    /// ignored.
    pub fn encode(&self, source: &PaddedBatch, langs: LanguageCodes) -> Result<SourceMemory, ConfigError> {
        let langs = LanguageCodes {
            src: check_width("source", langs.src, self.config.src_lang_dim)?,
            tgt: check_width("target", langs.tgt, self.config.tgt_lang_dim)?,
        };
        let (context, lengths) = self.encoder.encode(&self.params, source);
        Ok(self.decoder.prepare(context, lengths, langs))
    }

    /// Teacher-forced logits `[B, T-1, V]`.
    pub fn forward(&self, memory: &SourceMemory, targets: &PaddedBatch) -> Array3<f32> {
        self.decoder.forward(&self.params, memory, &targets.tokens)
    }
}

fn check_width(
    side: &'static str,
    one_hot: Option<Array2<f32>>,
    expected: usize,
) -> Result<Option<Array2<f32>>, ConfigError> {
    match one_hot {
        Some(l) if expected == 0 => {
            tracing::debug!(side, width = l.ncols(), "model has no language input; ignoring one-hot");
            Ok(None)
        }
        Some(l) if l.ncols() != expected => Err(ConfigError::LanguageWidth {
            side,
            expected,
            found: l.ncols(),
        }),
        other => Ok(other),
    }
}

impl StepDecoder for NmtModel {
    type Memory = SourceMemory;

    fn vocab_size(&self) -> usize {
        self.decoder.vocab_size(&self.params)
    }

    fn init_hidden(&self, memory: &SourceMemory) -> Array2<f32> {
        self.decoder.init_hidden(memory)
    }

    fn step(&self, memory: &SourceMemory, rows: &[usize], tokens: &[u32], hidden: ArrayView2<'_, f32>) -> StepOutput {
        let out = self.decoder.step(&self.params, memory, rows, tokens, hidden);
        StepOutput {
            logits: out.logits,
            hidden: out.hidden,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::padding::pad_to_longest;

    fn small(share: bool) -> ModelConfig {
        ModelConfig {
            src_vocab_size: 12,
            tgt_vocab_size: 12,
            d_word_vec: 4,
            d_model: 3,
            proj_share_weight: share,
            embs_share_weight: share,
            share_enc_dec: share,
            init_std: 0.2,
            ..Default::default()
        }
    }

    #[test]
    fn test_sharing_reduces_parameters() {
        let shared = NmtModel::new(small(true)).unwrap();
        let separate = NmtModel::new(small(false)).unwrap();
        assert_eq!(shared.params().num_matrices(), 1);
        assert_eq!(separate.params().num_matrices(), 3);
        assert_eq!(shared.params().num_cells(), 2);
        assert_eq!(separate.params().num_cells(), 4);
        assert!(shared.param_count() < separate.param_count());
    }

    #[test]
    fn test_tied_output_follows_embedding_edits() {
        let mut model = NmtModel::new(small(true)).unwrap();
        let emb = model.decoder().embedding;
        assert_eq!(emb, model.decoder().output);
        model.params_mut().get_mut(emb)[[5, 0]] = 9.0;
        assert_eq!(model.params().get(model.decoder().output)[[5, 0]], 9.0);
    }

    #[test]
    fn test_validate_rejects_bad_configs() {
        assert!(NmtModel::new(ModelConfig::default()).is_err());
        let mut cfg = small(true);
        cfg.tgt_vocab_size = 20;
        assert!(matches!(cfg.validate(), Err(ConfigError::Model(_))));
    }

    fn tgt_only(l: Array2<f32>) -> LanguageCodes {
        LanguageCodes { src: None, tgt: Some(l) }
    }

    #[test]
    fn test_encode_checks_language_width() {
        let mut cfg = small(false);
        cfg.tgt_lang_dim = 2;
        cfg.src_lang_dim = 3;
        let model = NmtModel::new(cfg).unwrap();
        let src = pad_to_longest(&[vec![2, 6, 3]]);
        let err = model.encode(&src, tgt_only(Array2::zeros((1, 3)))).err().unwrap();
        assert_eq!(
            err,
            ConfigError::LanguageWidth {
                side: "target",
                expected: 2,
                found: 3
            }
        );
        let bad_src = LanguageCodes {
            src: Some(Array2::zeros((1, 2))),
            tgt: None,
        };
        assert!(matches!(
            model.encode(&src, bad_src),
            Err(ConfigError::LanguageWidth { side: "source", .. })
        ));
        assert!(model.encode(&src, tgt_only(Array2::zeros((1, 2)))).is_ok());
    }

    #[test]
    fn test_source_language_reaches_decoder_state() {
        let mut cfg = small(false);
        cfg.src_lang_dim = 2;
        let model = NmtModel::new(cfg).unwrap();
        let src = pad_to_longest(&[vec![2, 6, 7, 3]]);
        let h0 = |row: [f32; 2]| {
            let codes = LanguageCodes {
                src: Some(Array2::from_shape_vec((1, 2), row.to_vec()).unwrap()),
                tgt: None,
            };
            model.init_hidden(&model.encode(&src, codes).unwrap())
        };
        assert!((&h0([1.0, 0.0]) - &h0([0.0, 1.0])).mapv(f32::abs).sum() > 1e-6);
    }

    #[test]
    fn test_unused_language_side_is_ignored() {
        let model = NmtModel::new(small(false)).unwrap();
        let src = pad_to_longest(&[vec![2, 6, 3]]);
        let mem = model.encode(&src, tgt_only(Array2::ones((1, 4)))).unwrap();
        assert!(mem.tgt_lang.is_none());
    }

    #[test]
    fn test_forward_shape() {
        let model = NmtModel::new(small(false)).unwrap();
        let src = pad_to_longest(&[vec![2, 6, 7, 3], vec![2, 5, 3]]);
        let tgt = pad_to_longest(&[vec![2, 8, 3], vec![2, 9, 9, 3]]);
        let mem = model.encode(&src, LanguageCodes::default()).unwrap();
        assert_eq!(model.forward(&mem, &tgt).dim(), (2, 3, 12));
        assert_eq!(model.vocab_size(), 12);
    }
}
