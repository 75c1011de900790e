//! Validation metrics: per-word cross-entropy, token accuracy and perplexity.
//!
//! Predictions at step `t` are scored against `target[:, t + 1]`; PAD
//! positions are ignored.

use anyhow::bail;
use ndarray::{s, Array3, ArrayView1, ArrayView2};
use serde::Serialize;

use crate::config::{PAD, PPL_LOSS_CAP};
use crate::data::lang::Languages;
use crate::data::scheduler::BatchScheduler;
use crate::model::nmt::NmtModel;
use crate::model::ops::{argmax, log_softmax};

/// Accumulated validation counts.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct EvalReport {
    pub words: usize,
    pub correct: usize,
    /// Summed negative log-likelihood in nats.
    pub total_loss: f64,
}

impl EvalReport {
    pub fn merge(&mut self, other: &EvalReport) {
        self.words += other.words;
        self.correct += other.correct;
        self.total_loss += other.total_loss;
    }

    pub fn loss_per_word(&self) -> f64 {
        if self.words == 0 {
            0.0
        } else {
            self.total_loss / self.words as f64
        }
    }

    pub fn accuracy(&self) -> f64 {
        if self.words == 0 {
            0.0
        } else {
            self.correct as f64 / self.words as f64
        }
    }

    /// `exp(min(loss_per_word, 100))`.
    pub fn perplexity(&self) -> f64 {
        self.loss_per_word().min(PPL_LOSS_CAP).exp()
    }
}

/// Negative log-probability of `gold` under `logits`.
pub fn cross_entropy(logits: ArrayView1<'_, f32>, gold: u32) -> f64 {
    -(log_softmax(logits)[gold as usize] as f64)
}

/// Score teacher-forced logits `[B, T, V]` against gold tokens `[B, T]`.
pub fn score_batch(logits: &Array3<f32>, gold: ArrayView2<'_, u32>) -> EvalReport {
    let mut report = EvalReport::default();
    for (b, row) in logits.outer_iter().enumerate() {
        for (t, step) in row.outer_iter().enumerate() {
            let g = gold[[b, t]];
            if g == PAD {
                continue;
            }
            report.words += 1;
            report.total_loss += cross_entropy(step, g);
            if argmax(step) as u32 == g {
                report.correct += 1;
            }
        }
    }
    report
}

/// Evaluate `model` over one epoch of `scheduler`.
///
/// Batches must carry targets. The model receives one-hot encodings of
/// whichever language tags both `languages` and the batches carry.
pub fn evaluate(
    model: &NmtModel,
    scheduler: &mut BatchScheduler,
    languages: &Languages,
) -> anyhow::Result<EvalReport> {
    let mut report = EvalReport::default();
    for batch in scheduler.epoch() {
        let batch = batch?;
        let Some(target) = &batch.target else {
            bail!("evaluation batch has no target side");
        };
        let memory = model.encode(&batch.source, languages.one_hots(&batch))?;
        let logits = model.forward(&memory, target);
        let gold = target.tokens.slice(s![.., 1..]);
        report.merge(&score_batch(&logits, gold));
    }
    tracing::info!(
        words = report.words,
        loss = report.loss_per_word(),
        accuracy = report.accuracy(),
        ppl = report.perplexity(),
        "evaluation finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::instance::InstanceStore;
    use crate::data::scheduler::SchedulerConfig;
    use crate::model::nmt::ModelConfig;
    use ndarray::array;

    #[test]
    fn test_score_batch_ignores_pad() {
        let mut logits = Array3::zeros((1, 3, 4));
        logits[[0, 0, 2]] = 5.0;
        logits[[0, 1, 1]] = 5.0;
        let gold = array![[2u32, 3, PAD]];
        let report = score_batch(&logits, gold.view());
        assert_eq!(report.words, 2);
        assert_eq!(report.correct, 1);
        assert!(report.total_loss > 0.0);
    }

    #[test]
    fn test_uniform_logits_perplexity_is_vocab_size() {
        let logits = Array3::zeros((2, 2, 8));
        let gold = array![[4u32, 5], [6, 7]];
        let report = score_batch(&logits, gold.view());
        assert!((report.perplexity() - 8.0).abs() < 1e-4);
        assert!((report.loss_per_word() - 8f64.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_perplexity_is_capped() {
        let report = EvalReport {
            words: 1,
            correct: 0,
            total_loss: 1e6,
        };
        assert_eq!(report.perplexity(), PPL_LOSS_CAP.exp());
    }

    #[test]
    fn test_evaluate_over_epoch() {
        let model = NmtModel::new(ModelConfig {
            src_vocab_size: 10,
            tgt_vocab_size: 10,
            d_word_vec: 4,
            d_model: 3,
            init_std: 0.3,
            ..Default::default()
        })
        .unwrap();
        let store = InstanceStore::new(vec![vec![2, 5, 3], vec![2, 6, 7, 3], vec![2, 3]])
            .with_targets(vec![vec![2, 8, 3], vec![2, 9, 3], vec![2, 4, 4, 3]])
            .unwrap();
        let mut sched = BatchScheduler::single(store, SchedulerConfig::sequential(2)).unwrap();
        let report = evaluate(&model, &mut sched, &Languages::default()).unwrap();
        // Gold excludes the leading BOS: 2 + 2 + 3 words.
        assert_eq!(report.words, 7);
        assert!(report.perplexity() > 1.0);
    }

    #[test]
    fn test_evaluate_requires_targets() {
        let model = NmtModel::new(ModelConfig {
            src_vocab_size: 10,
            tgt_vocab_size: 10,
            d_word_vec: 4,
            d_model: 3,
            ..Default::default()
        })
        .unwrap();
        let store = InstanceStore::new(vec![vec![2, 5, 3], vec![2, 3]]);
        let mut sched = BatchScheduler::single(store, SchedulerConfig::sequential(2)).unwrap();
        assert!(evaluate(&model, &mut sched, &Languages::default()).is_err());
    }

    #[test]
    fn test_evaluate_feeds_source_language() {
        let model = NmtModel::new(ModelConfig {
            src_vocab_size: 10,
            tgt_vocab_size: 10,
            d_word_vec: 4,
            d_model: 3,
            src_lang_dim: 2,
            init_std: 0.5,
            ..Default::default()
        })
        .unwrap();
        let store = InstanceStore::new(vec![vec![2, 5, 3], vec![2, 6, 7, 3]])
            .with_targets(vec![vec![2, 8, 3], vec![2, 9, 3]])
            .unwrap()
            .with_src_langs(vec![vec![4], vec![5]])
            .unwrap();
        let langs = Languages::from_store(&store);

        let mut sched = BatchScheduler::single(store.clone(), SchedulerConfig::sequential(2)).unwrap();
        let tagged = evaluate(&model, &mut sched, &langs).unwrap();
        let mut sched = BatchScheduler::single(store, SchedulerConfig::sequential(2)).unwrap();
        let untagged = evaluate(&model, &mut sched, &Languages::default()).unwrap();

        assert_eq!(tagged.words, untagged.words);
        assert!((tagged.total_loss - untagged.total_loss).abs() > 1e-9);
    }
}
