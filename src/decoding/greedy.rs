//! Batched greedy decoding.
//!
//! Every row advances in lock-step taking the argmax token. A row is done
//! once it emits EOS; its later outputs are discarded. Decoding stops when
//! all rows are done or after `max_steps` steps.

use crate::config::EOS;
use crate::error::ConfigError;
use crate::model::ops::argmax;

use super::step::{start_tokens, DecodeConfig, Decoded, StepDecoder};

/// Greedy search from `start` (BOS for every row when `None`).
///
/// Fails when `start` does not hold one token per memory row.
pub fn greedy_search<D: StepDecoder>(
    decoder: &D,
    memory: &D::Memory,
    config: &DecodeConfig,
    start: Option<&[u32]>,
) -> Result<Vec<Decoded>, ConfigError> {
    let mut hidden = decoder.init_hidden(memory);
    let batch = hidden.nrows();
    let rows: Vec<usize> = (0..batch).collect();
    let mut tokens = start_tokens(start, batch)?;
    let mut out = vec![Decoded::default(); batch];
    let mut done = vec![false; batch];

    for step in 0..config.max_steps {
        let next = decoder.step(memory, &rows, &tokens, hidden.view());
        for (i, logits) in next.logits.outer_iter().enumerate() {
            let token = argmax(logits) as u32;
            if done[i] {
                continue;
            }
            if token == EOS {
                done[i] = true;
                out[i].terminated = true;
            } else {
                out[i].tokens.push(token);
            }
            tokens[i] = token;
        }
        hidden = next.hidden;

        if done.iter().all(|&d| d) {
            tracing::trace!(steps = step + 1, batch, "greedy search finished");
            break;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoding::step::mock::{BigramDecoder, ScriptedDecoder};
    use ndarray::Array2;

    fn eos_first() -> ScriptedDecoder {
        let mut row = vec![0.0; 6];
        row[EOS as usize] = 5.0;
        ScriptedDecoder { script: vec![row] }
    }

    #[test]
    fn test_immediate_eos_gives_empty_output() {
        let out = greedy_search(&eos_first(), &3, &DecodeConfig::default(), None).unwrap();
        assert_eq!(out.len(), 3);
        for d in out {
            assert!(d.tokens.is_empty());
            assert!(d.terminated);
        }
    }

    #[test]
    fn test_step_bound_without_eos() {
        let mut row = vec![0.0; 6];
        row[4] = 1.0;
        let dec = ScriptedDecoder { script: vec![row] };
        let config = DecodeConfig {
            max_steps: 7,
            ..Default::default()
        };
        let out = greedy_search(&dec, &1, &config, None).unwrap();
        assert_eq!(out[0].tokens, vec![4; 7]);
        assert!(!out[0].terminated);
    }

    #[test]
    fn test_rows_finish_independently() {
        // BOS(2) -> 4 -> 5 -> EOS; start token 5 -> EOS directly.
        let mut table = Array2::from_elem((6, 6), -1.0);
        table[[2, 4]] = 1.0;
        table[[4, 5]] = 1.0;
        table[[5, 3]] = 1.0;
        table[[3, 3]] = 1.0;
        let dec = BigramDecoder { table };
        let out = greedy_search(&dec, &2, &DecodeConfig::default(), Some(&[2, 5])).unwrap();
        assert_eq!(out[0].tokens, vec![4, 5]);
        assert!(out[0].terminated);
        assert!(out[1].tokens.is_empty());
        assert!(out[1].terminated);
    }

    #[test]
    fn test_start_tokens_must_match_batch() {
        let err = greedy_search(&eos_first(), &3, &DecodeConfig::default(), Some(&[2, 2])).unwrap_err();
        assert_eq!(err, ConfigError::StartTokens { expected: 3, found: 2 });
    }
}
