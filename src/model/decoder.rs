//! Attention decoder.
//!
//! One step, for a batch of rows:
//!
//! ```text
//! e    = Emb[y_prev]
//! s̃    = GRU₁(e, s)                      first recurrent update
//! a    = attention(s̃, memory)            additive, masked by source length
//! c    = Σ a · context
//! s'   = GRU₂([c ; tgt_lang], s̃)        second recurrent update
//! o    = tanh(W_e e + W_c c + W_s s')
//! z    = Out · o                          logits over the target vocabulary
//! ```
//!
//! The initial state is a linear map of `[mean ; tgt_lang ; src_lang]`: the
//! length-masked mean of the encoder context followed by whichever language
//! one-hots the model was built with.

use ndarray::{s, Array2, Array3, ArrayView2, Axis};
use rand::Rng;

use crate::config::UNK;
use crate::data::lang::LanguageCodes;

use super::attention::AdditiveAttention;
use super::linear::Linear;
use super::params::{CellId, ParamId, ParamStore};

/// Encoder output plus everything the decoder needs to attend over it.
#[derive(Clone, Debug)]
pub struct SourceMemory {
    /// `[B, T, C]`, zero past each row's length.
    pub context: Array3<f32>,

    /// Unpadded source length per row.
    pub lengths: Vec<usize>,

    /// Precomputed attention keys `[B, T, A]`.
    pub keys: Array3<f32>,

    /// Target-language one-hot per row `[B, L_tgt]`.
    pub tgt_lang: Option<Array2<f32>>,

    /// Source-language one-hot per row `[B, L_src]`.
    pub src_lang: Option<Array2<f32>>,
}

impl SourceMemory {
    pub fn batch_size(&self) -> usize {
        self.context.len_of(Axis(0))
    }

    pub fn src_len(&self) -> usize {
        self.context.len_of(Axis(1))
    }
}

/// Result of one decoder step.
#[derive(Clone, Debug)]
pub struct DecoderStep {
    /// `[n, V]`
    pub logits: Array2<f32>,

    /// `[n, H]`
    pub hidden: Array2<f32>,

    /// `[n, T]`
    pub attention: Array2<f32>,
}

#[derive(Clone, Debug)]
pub struct AttentionDecoder {
    /// Target embedding table `[V, E]`.
    pub embedding: ParamId,

    /// Output projection `[V, E]`; equal to `embedding` when tied.
    pub output: ParamId,

    /// Embedding → state update.
    pub input_cell: CellId,

    /// Context (+ target language) → state update.
    pub context_cell: CellId,

    pub attention: AdditiveAttention,

    /// Mean context (+ languages) → initial state.
    pub init_proj: Linear,

    pub emb_to_out: Linear,
    pub ctx_to_out: Linear,
    pub state_to_out: Linear,

    /// Width of the target-language one-hot; 0 when unused.
    pub tgt_lang_dim: usize,

    /// Width of the source-language one-hot; 0 when unused.
    pub src_lang_dim: usize,
}

/// Dimensions needed to build an [`AttentionDecoder`].
#[derive(Clone, Copy, Debug)]
pub struct DecoderDims {
    pub word_dim: usize,
    pub hidden_dim: usize,
    pub context_dim: usize,
    pub tgt_lang_dim: usize,
    pub src_lang_dim: usize,
}

impl AttentionDecoder {
    /// Seeded decoder whose embedding/output/cells were already allocated.
    pub fn seeded<R: Rng + ?Sized>(
        embedding: ParamId,
        output: ParamId,
        input_cell: CellId,
        context_cell: CellId,
        dims: DecoderDims,
        std: f32,
        rng: &mut R,
    ) -> Self {
        let DecoderDims {
            word_dim,
            hidden_dim,
            context_dim,
            tgt_lang_dim,
            src_lang_dim,
        } = dims;
        Self {
            embedding,
            output,
            input_cell,
            context_cell,
            attention: AdditiveAttention::seeded(hidden_dim, context_dim, hidden_dim, std, rng),
            init_proj: Linear::seeded(context_dim + tgt_lang_dim + src_lang_dim, hidden_dim, true, std, rng),
            emb_to_out: Linear::seeded(word_dim, word_dim, true, std, rng),
            ctx_to_out: Linear::seeded(context_dim, word_dim, false, std, rng),
            state_to_out: Linear::seeded(hidden_dim, word_dim, false, std, rng),
            tgt_lang_dim,
            src_lang_dim,
        }
    }

    pub fn vocab_size(&self, params: &ParamStore) -> usize {
        params.get(self.output).nrows()
    }

    /// Attach attention keys to an encoded source batch.
    pub fn prepare(&self, context: Array3<f32>, lengths: Vec<usize>, langs: LanguageCodes) -> SourceMemory {
        let keys = self.attention.project_keys(&context);
        SourceMemory {
            context,
            lengths,
            keys,
            tgt_lang: langs.tgt,
            src_lang: langs.src,
        }
    }

    /// Initial state `[B, H]`.
    pub fn init_hidden(&self, memory: &SourceMemory) -> Array2<f32> {
        let (batch, _, width) = memory.context.dim();
        let mut mean = Array2::zeros((batch, width));
        for (b, mut row) in mean.outer_iter_mut().enumerate() {
            let len = memory.lengths[b].min(memory.src_len());
            if len > 0 {
                let valid = memory.context.slice(s![b, ..len, ..]);
                row.assign(&(valid.sum_axis(Axis(0)) / len as f32));
            }
        }
        let input = append_one_hot(mean, memory.tgt_lang.as_ref(), self.tgt_lang_dim, None);
        let input = append_one_hot(input, memory.src_lang.as_ref(), self.src_lang_dim, None);
        self.init_proj.forward(input.view())
    }

    fn embed(&self, params: &ParamStore, tokens: &[u32]) -> Array2<f32> {
        let width = params.get(self.embedding).ncols();
        let mut out = Array2::zeros((tokens.len(), width));
        for (i, &t) in tokens.iter().enumerate() {
            out.row_mut(i).assign(&params.row(self.embedding, t, UNK));
        }
        out
    }

    /// One decoding step for query rows addressing memory rows `rows`.
    pub fn step(
        &self,
        params: &ParamStore,
        memory: &SourceMemory,
        rows: &[usize],
        tokens: &[u32],
        hidden: ArrayView2<'_, f32>,
    ) -> DecoderStep {
        let emb = self.embed(params, tokens);
        let cand = params.cell(self.input_cell).step(emb.view(), hidden);

        let attention = self
            .attention
            .weights(cand.view(), &memory.keys, rows, &memory.lengths);
        let ctx = AdditiveAttention::context(&attention, &memory.context, rows);

        let cell_input = append_one_hot(ctx.clone(), memory.tgt_lang.as_ref(), self.tgt_lang_dim, Some(rows));
        let hidden = params
            .cell(self.context_cell)
            .step(cell_input.view(), cand.view());

        let fin = (self.emb_to_out.forward(emb.view())
            + self.ctx_to_out.forward(ctx.view())
            + self.state_to_out.forward(hidden.view()))
        .mapv(f32::tanh);
        let logits = fin.dot(&params.get(self.output).t());

        DecoderStep {
            logits,
            hidden,
            attention,
        }
    }

    /// Teacher-forced logits `[B, T-1, V]` for padded targets `[B, T]`.
    ///
    /// Step `t` consumes `targets[:, t]` and predicts `targets[:, t + 1]`.
    pub fn forward(&self, params: &ParamStore, memory: &SourceMemory, targets: &Array2<u32>) -> Array3<f32> {
        let (batch, tgt_len) = targets.dim();
        let steps = tgt_len.saturating_sub(1);
        let vocab = self.vocab_size(params);
        let rows: Vec<usize> = (0..batch).collect();

        let mut out = Array3::zeros((batch, steps, vocab));
        let mut hidden = self.init_hidden(memory);
        for t in 0..steps {
            let tokens: Vec<u32> = targets.column(t).to_vec();
            let step = self.step(params, memory, &rows, &tokens, hidden.view());
            out.index_axis_mut(Axis(1), t).assign(&step.logits);
            hidden = step.hidden;
        }
        out
    }
}

/// Append `width` one-hot columns to `x`, taken from `table` at `rows` (all
/// rows when `None`). A missing table appends zeros.
fn append_one_hot(
    x: Array2<f32>,
    table: Option<&Array2<f32>>,
    width: usize,
    rows: Option<&[usize]>,
) -> Array2<f32> {
    if width == 0 {
        return x;
    }
    let lang = match (table, rows) {
        (Some(t), Some(rows)) => t.select(Axis(0), rows),
        (Some(t), None) => t.clone(),
        (None, _) => Array2::zeros((x.nrows(), width)),
    };
    let cols = x.ncols();
    let mut out = Array2::zeros((x.nrows(), cols + width));
    out.slice_mut(s![.., ..cols]).assign(&x);
    out.slice_mut(s![.., cols..]).assign(&lang);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::cell::GruCell;
    use crate::model::linear::gaussian;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const V: usize = 9;
    const E: usize = 4;
    const H: usize = 5;
    const C: usize = 6;

    fn build(tgt_lang_dim: usize) -> (ParamStore, AttentionDecoder) {
        build_with(tgt_lang_dim, 0)
    }

    fn build_with(tgt_lang_dim: usize, src_lang_dim: usize) -> (ParamStore, AttentionDecoder) {
        let mut rng = StdRng::seed_from_u64(21);
        let mut store = ParamStore::new();
        let emb = store.insert("tgt_emb", gaussian(V, E, 0.3, &mut rng));
        let c1 = store.insert_cell(GruCell::seeded(E, H, 0.3, &mut rng));
        let c2 = store.insert_cell(GruCell::seeded(C + tgt_lang_dim, H, 0.3, &mut rng));
        let dims = DecoderDims {
            word_dim: E,
            hidden_dim: H,
            context_dim: C,
            tgt_lang_dim,
            src_lang_dim,
        };
        let dec = AttentionDecoder::seeded(emb, emb, c1, c2, dims, 0.3, &mut rng);
        (store, dec)
    }

    fn memory(dec: &AttentionDecoder, tgt: Option<Array2<f32>>) -> SourceMemory {
        memory_with(dec, LanguageCodes { src: None, tgt })
    }

    fn memory_with(dec: &AttentionDecoder, langs: LanguageCodes) -> SourceMemory {
        let mut ctx = Array3::from_shape_fn((2, 3, C), |(b, t, c)| ((b + t + c) % 4) as f32 * 0.25);
        ctx.slice_mut(s![1, 2, ..]).fill(0.0);
        dec.prepare(ctx, vec![3, 2], langs)
    }

    #[test]
    fn test_step_shapes_and_attention_mask() {
        let (store, dec) = build(0);
        let mem = memory(&dec, None);
        let h0 = dec.init_hidden(&mem);
        assert_eq!(h0.dim(), (2, H));

        let step = dec.step(&store, &mem, &[0, 1, 1], &[2, 2, 5], h0.select(Axis(0), &[0, 1, 1]).view());
        assert_eq!(step.logits.dim(), (3, V));
        assert_eq!(step.hidden.dim(), (3, H));
        assert_eq!(step.attention[[1, 2]], 0.0);
        assert!((step.attention.row(0).sum() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_language_one_hot_changes_output() {
        let (store, dec) = build(2);
        let run = |lang: Vec<f32>| {
            let mem = memory(&dec, Some(Array2::from_shape_vec((2, 2), lang).unwrap()));
            let h0 = dec.init_hidden(&mem);
            dec.step(&store, &mem, &[0], &[2], h0.slice(s![..1, ..])).logits
        };
        let de = run(vec![1.0, 0.0, 1.0, 0.0]);
        let fr = run(vec![0.0, 1.0, 0.0, 1.0]);
        let diff: f32 = (&de - &fr).mapv(f32::abs).sum();
        assert!(diff > 1e-6);
    }

    #[test]
    fn test_source_language_one_hot_changes_initial_state() {
        let (store, dec) = build_with(0, 3);
        assert_eq!(dec.init_proj.in_dim(), C + 3);
        let run = |src: Vec<f32>| {
            let mem = memory_with(
                &dec,
                LanguageCodes {
                    src: Some(Array2::from_shape_vec((2, 3), src).unwrap()),
                    tgt: None,
                },
            );
            let h0 = dec.init_hidden(&mem);
            let logits = dec.step(&store, &mem, &[0], &[2], h0.slice(s![..1, ..])).logits;
            (h0, logits)
        };
        let (h_en, z_en) = run(vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        let (h_it, z_it) = run(vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0]);
        assert!((&h_en - &h_it).mapv(f32::abs).sum() > 1e-6);
        assert!((&z_en - &z_it).mapv(f32::abs).sum() > 1e-6);
    }

    #[test]
    fn test_forward_matches_stepping() {
        let (store, dec) = build(0);
        let mem = memory(&dec, None);
        let targets = Array2::from_shape_vec((2, 3), vec![2, 4, 3, 2, 5, 3]).unwrap();
        let logits = dec.forward(&store, &mem, &targets);
        assert_eq!(logits.dim(), (2, 2, V));

        let h0 = dec.init_hidden(&mem);
        let first = dec.step(&store, &mem, &[0, 1], &[2, 2], h0.view());
        for v in 0..V {
            assert!((logits[[1, 0, v]] - first.logits[[1, v]]).abs() < 1e-6);
        }
    }
}
