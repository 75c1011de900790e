//! Batched beam search with length-normalised final selection.
//!
//! Each sentence keeps up to `width` live hypotheses. At every step the
//! live hypotheses of all unfinished sentences are advanced in one decoder
//! call; each sentence then keeps its `width - completed` best extensions by
//! cumulative log-probability. Extensions ending in EOS move to the completed
//! set. A sentence is finished once it has `width` completed hypotheses.
//!
//! The answer is the completed hypothesis maximising
//!
//! ```text
//! log_prob / lp(len),   lp(len) = ((5 + len) / (5 + 1))^α
//! ```
//!
//! where `len` counts generated tokens including EOS. When the step bound is
//! reached with nothing completed, live hypotheses compete instead.
//!
//! Scores accumulate in f64 so that distinct f32 logits stay distinct under a
//! long prefix. Ties are broken by generation order (earlier hypothesis, then
//! lower token id), which makes width 1 reproduce greedy search exactly.

use std::cmp::Ordering;

use ndarray::{concatenate, s, Array2, ArrayView2, Axis};

use crate::config::{EOS, LENGTH_PENALTY_BASE};
use crate::error::ConfigError;
use crate::model::ops::log_softmax_f64;

use super::step::{start_tokens, DecodeConfig, Decoded, StepDecoder};

/// A partial or completed output sequence.
#[derive(Clone, Debug, PartialEq)]
pub struct Hypothesis {
    /// Generated tokens; a completed hypothesis ends with EOS.
    pub tokens: Vec<u32>,

    /// Sum of token log-probabilities.
    pub log_prob: f64,

    /// Token fed to the next step.
    pub last_token: u32,
}

impl Hypothesis {
    fn root(start: u32) -> Self {
        Self {
            tokens: Vec::new(),
            log_prob: 0.0,
            last_token: start,
        }
    }

    fn extend(&self, token: u32, log_prob: f64) -> Self {
        let mut tokens = self.tokens.clone();
        tokens.push(token);
        Self {
            tokens,
            log_prob,
            last_token: token,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.tokens.last() == Some(&EOS)
    }

    pub fn normalized_score(&self, alpha: f32) -> f64 {
        normalized_score(self.log_prob, self.tokens.len(), alpha)
    }
}

/// `((5 + len) / 6)^α`.
pub fn length_penalty(len: usize, alpha: f32) -> f32 {
    ((LENGTH_PENALTY_BASE + len as f32) / (LENGTH_PENALTY_BASE + 1.0)).powf(alpha)
}

pub fn normalized_score(log_prob: f64, len: usize, alpha: f32) -> f64 {
    log_prob / f64::from(length_penalty(len, alpha))
}

/// A scored one-token extension of a live hypothesis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    /// Index of the extended hypothesis.
    pub hypothesis: usize,
    pub token: u32,
    /// Cumulative log-probability after the extension.
    pub score: f64,
}

fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then(a.hypothesis.cmp(&b.hypothesis))
        .then(a.token.cmp(&b.token))
}

/// The `k` best entries of a `[hypotheses, V]` score table, best first.
pub fn top_candidates(scores: ArrayView2<'_, f64>, k: usize) -> Vec<Candidate> {
    let mut all: Vec<Candidate> = scores
        .indexed_iter()
        .map(|((h, t), &score)| Candidate {
            hypothesis: h,
            token: t as u32,
            score,
        })
        .collect();
    if k == 0 || all.is_empty() {
        return Vec::new();
    }
    if k < all.len() {
        all.select_nth_unstable_by(k - 1, rank);
        all.truncate(k);
    }
    all.sort_by(rank);
    all
}

/// Search state of one sentence.
#[derive(Clone, Debug)]
pub struct Beam {
    width: usize,
    live: Vec<Hypothesis>,
    /// Hidden state per live hypothesis, row-aligned with `live`.
    hidden: Array2<f32>,
    completed: Vec<Hypothesis>,
}

impl Beam {
    fn new(width: usize, start: u32, hidden: Array2<f32>) -> Self {
        Self {
            width,
            live: vec![Hypothesis::root(start)],
            hidden,
            completed: Vec::new(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.completed.len() >= self.width || self.live.is_empty()
    }

    /// Extend with this step's logits `[live, V]` and new hidden states.
    fn advance(&mut self, logits: ArrayView2<'_, f32>, hidden: ArrayView2<'_, f32>) {
        let mut scores = Array2::zeros(logits.dim());
        for ((hyp, row), mut out) in self
            .live
            .iter()
            .zip(logits.outer_iter())
            .zip(scores.outer_iter_mut())
        {
            out.assign(&(log_softmax_f64(row) + hyp.log_prob));
        }

        let picks = top_candidates(scores.view(), self.width - self.completed.len());
        let mut live = Vec::with_capacity(picks.len());
        let mut keep = Vec::with_capacity(picks.len());
        for c in picks {
            let hyp = self.live[c.hypothesis].extend(c.token, c.score);
            if c.token == EOS {
                self.completed.push(hyp);
            } else {
                live.push(hyp);
                keep.push(c.hypothesis);
            }
        }
        self.hidden = hidden.select(Axis(0), &keep);
        self.live = live;
    }

    /// Best hypothesis by normalised score; EOS is stripped from the output.
    fn finish(self, alpha: f32) -> Decoded {
        let pool = if self.completed.is_empty() {
            self.live
        } else {
            self.completed
        };
        let mut best: Option<&Hypothesis> = None;
        for hyp in &pool {
            let better = match best {
                None => true,
                Some(b) => hyp.normalized_score(alpha) > b.normalized_score(alpha),
            };
            if better {
                best = Some(hyp);
            }
        }
        match best {
            Some(hyp) => {
                let terminated = hyp.is_complete();
                let mut tokens = hyp.tokens.clone();
                if terminated {
                    tokens.pop();
                }
                Decoded { tokens, terminated }
            }
            None => Decoded::default(),
        }
    }
}

/// Beam search from `start` (BOS for every row when `None`).
///
/// Fails when `start` does not hold one token per memory row.
pub fn beam_search<D: StepDecoder>(
    decoder: &D,
    memory: &D::Memory,
    config: &DecodeConfig,
    start: Option<&[u32]>,
) -> Result<Vec<Decoded>, ConfigError> {
    let width = config.beam_width.max(1);
    let init = decoder.init_hidden(memory);
    let batch = init.nrows();
    let starts = start_tokens(start, batch)?;
    let mut beams: Vec<Beam> = (0..batch)
        .map(|b| Beam::new(width, starts[b], init.slice(s![b..b + 1, ..]).to_owned()))
        .collect();

    for step in 0..config.max_steps {
        let mut rows = Vec::new();
        let mut tokens = Vec::new();
        let mut states = Vec::new();
        for (b, beam) in beams.iter().enumerate().filter(|(_, beam)| !beam.is_done()) {
            rows.extend(std::iter::repeat(b).take(beam.live.len()));
            tokens.extend(beam.live.iter().map(|h| h.last_token));
            states.push(beam.hidden.view());
        }
        if rows.is_empty() {
            break;
        }
        let hidden = match concatenate(Axis(0), &states) {
            Ok(h) => h,
            Err(err) => {
                tracing::warn!(%err, "inconsistent beam states; stopping search");
                break;
            }
        };

        let out = decoder.step(memory, &rows, &tokens, hidden.view());

        let mut offset = 0;
        for beam in beams.iter_mut().filter(|beam| !beam.is_done()) {
            let n = beam.live.len();
            beam.advance(
                out.logits.slice(s![offset..offset + n, ..]),
                out.hidden.slice(s![offset..offset + n, ..]),
            );
            offset += n;
        }

        if beams.iter().all(Beam::is_done) {
            tracing::trace!(steps = step + 1, batch, width, "beam search finished");
            break;
        }
    }

    Ok(beams.into_iter().map(|beam| beam.finish(config.alpha)).collect())
}
