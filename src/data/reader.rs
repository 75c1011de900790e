//! Reading tokenised text files into instance stores.
//!
//! Sentences are whitespace-tokenised, optionally lower-cased, trimmed or
//! skipped when longer than `max_len` words, mapped through a vocabulary and
//! wrapped in BOS/EOS. Language-tag files are mapped the same way but are not
//! wrapped.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{BOS, DEFAULT_MAX_SENT_LEN, EOS};
use crate::error::DataError;

use super::instance::{InstanceStore, Sequence};
use super::vocab::Vocabulary;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadOptions {
    /// Maximum words per sentence before BOS/EOS are added.
    pub max_len: usize,

    /// Keep the original casing; otherwise lower-case before lookup.
    pub keep_case: bool,

    /// Drop over-long parallel instances instead of trimming them.
    pub skip_long: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            max_len: DEFAULT_MAX_SENT_LEN,
            keep_case: true,
            skip_long: true,
        }
    }
}

/// Counters reported by the readers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReadStats {
    pub lines: usize,
    pub kept: usize,
    /// Over-long sentences that were trimmed to `max_len`.
    pub trimmed: usize,
    /// Over-long instances dropped because `skip_long` is set.
    pub skipped: usize,
    /// Parallel instances dropped because one side was empty.
    pub empty: usize,
}

/// Paths of one parallel corpus. Tag files are optional.
#[derive(Clone, Debug, Default)]
pub struct CorpusPaths {
    pub source: PathBuf,
    pub target: PathBuf,
    pub src_lang: Option<PathBuf>,
    pub tgt_lang: Option<PathBuf>,
}

fn read_lines(path: &Path) -> Result<Vec<String>, DataError> {
    let text = fs::read_to_string(path).map_err(|e| DataError::io(path, e))?;
    Ok(text.lines().map(str::to_owned).collect())
}

fn tokenize(line: &str, keep_case: bool) -> Vec<String> {
    let line = if keep_case {
        line.to_owned()
    } else {
        line.to_lowercase()
    };
    line.split_whitespace().map(str::to_owned).collect()
}

fn wrap(vocab: &Vocabulary, words: &[String]) -> Sequence {
    let mut seq = Vec::with_capacity(words.len() + 2);
    seq.push(BOS);
    seq.extend(vocab.encode(words));
    seq.push(EOS);
    seq
}

/// Read a monolingual file, one BOS/EOS-wrapped instance per line.
///
/// Over-long lines are always trimmed so that output stays line-aligned with
/// the input; an empty line becomes `[BOS, EOS]`.
pub fn read_sentences(
    path: &Path,
    vocab: &Vocabulary,
    options: &ReadOptions,
) -> Result<(Vec<Sequence>, ReadStats), DataError> {
    let mut stats = ReadStats::default();
    let mut out = Vec::new();
    for line in read_lines(path)? {
        stats.lines += 1;
        let mut words = tokenize(&line, options.keep_case);
        if words.len() > options.max_len {
            words.truncate(options.max_len);
            stats.trimmed += 1;
        }
        out.push(wrap(vocab, &words));
    }
    stats.kept = out.len();
    log_stats(path, &stats, options);
    Ok((out, stats))
}

/// Read a language-tag file: one unwrapped tag sequence per line.
pub fn read_tags(path: &Path, vocab: &Vocabulary, options: &ReadOptions) -> Result<Vec<Sequence>, DataError> {
    Ok(read_lines(path)?
        .iter()
        .map(|line| {
            let mut words = tokenize(line, options.keep_case);
            words.truncate(options.max_len);
            vocab.encode(&words)
        })
        .collect())
}

/// Read a parallel corpus with optional language-tag files.
///
/// Source and tag files map through `src_vocab`, the target file through
/// `tgt_vocab`. All files must have the same number of lines.
pub fn read_corpus(
    paths: &CorpusPaths,
    src_vocab: &Vocabulary,
    tgt_vocab: &Vocabulary,
    options: &ReadOptions,
) -> Result<(InstanceStore, ReadStats), DataError> {
    let src_lines = read_lines(&paths.source)?;
    let tgt_lines = read_lines(&paths.target)?;
    check_lines(src_lines.len(), tgt_lines.len())?;

    let src_lang = match &paths.src_lang {
        Some(p) => Some(read_tags(p, src_vocab, options)?),
        None => None,
    };
    let tgt_lang = match &paths.tgt_lang {
        Some(p) => Some(read_tags(p, src_vocab, options)?),
        None => None,
    };
    for tags in src_lang.iter().chain(tgt_lang.iter()) {
        check_lines(src_lines.len(), tags.len())?;
    }

    let mut stats = ReadStats::default();
    let mut sources = Vec::new();
    let mut targets = Vec::new();
    let mut kept_idx = Vec::new();

    for (i, (src, tgt)) in src_lines.iter().zip(&tgt_lines).enumerate() {
        stats.lines += 1;
        let mut src_words = tokenize(src, options.keep_case);
        let mut tgt_words = tokenize(tgt, options.keep_case);

        if src_words.len() > options.max_len || tgt_words.len() > options.max_len {
            if options.skip_long {
                stats.skipped += 1;
                continue;
            }
            src_words.truncate(options.max_len);
            tgt_words.truncate(options.max_len);
            stats.trimmed += 1;
        }
        if src_words.is_empty() || tgt_words.is_empty() {
            stats.empty += 1;
            continue;
        }

        sources.push(wrap(src_vocab, &src_words));
        targets.push(wrap(tgt_vocab, &tgt_words));
        kept_idx.push(i);
    }
    stats.kept = sources.len();

    let pick = |tags: Vec<Sequence>| -> Vec<Sequence> {
        let mut tags: Vec<Option<Sequence>> = tags.into_iter().map(Some).collect();
        kept_idx.iter().filter_map(|&i| tags[i].take()).collect()
    };

    let mut store = InstanceStore::new(sources).with_targets(targets)?;
    if let Some(tags) = src_lang {
        store = store.with_src_langs(pick(tags))?;
    }
    if let Some(tags) = tgt_lang {
        store = store.with_tgt_langs(pick(tags))?;
    }

    log_stats(&paths.source, &stats, options);
    Ok((store, stats))
}

fn check_lines(left: usize, right: usize) -> Result<(), DataError> {
    if left != right {
        return Err(DataError::LineCountMismatch { left, right });
    }
    Ok(())
}

fn log_stats(path: &Path, stats: &ReadStats, options: &ReadOptions) {
    tracing::info!(path = %path.display(), lines = stats.lines, kept = stats.kept, "read corpus");
    if stats.trimmed > 0 {
        tracing::warn!(
            count = stats.trimmed,
            max_len = options.max_len,
            "instances trimmed to the maximum sentence length"
        );
    }
    if stats.skipped > 0 {
        tracing::warn!(
            count = stats.skipped,
            max_len = options.max_len,
            "instances ignored for exceeding the maximum sentence length"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UNK;
    use std::collections::HashMap;
    use std::io::Write;

    fn vocab() -> Vocabulary {
        let words = ["<blank>", "<unk>", "<s>", "</s>", "a", "b", "c", "<2de>", "<2fr>"];
        let map: HashMap<String, u32> = words
            .iter()
            .enumerate()
            .map(|(i, w)| (w.to_string(), i as u32))
            .collect();
        Vocabulary::from_map(map).unwrap()
    }

    fn write(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_read_sentences_wraps_and_trims() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "in.txt", "a b\nA c z\n\na a a a\n");
        let options = ReadOptions {
            max_len: 3,
            keep_case: false,
            skip_long: true,
        };
        let (seqs, stats) = read_sentences(&path, &vocab(), &options).unwrap();
        assert_eq!(seqs[0], vec![BOS, 4, 5, EOS]);
        assert_eq!(seqs[1], vec![BOS, 4, 6, UNK, EOS]);
        assert_eq!(seqs[2], vec![BOS, EOS]);
        assert_eq!(seqs[3], vec![BOS, 4, 4, 4, EOS]);
        assert_eq!(stats.trimmed, 1);
        assert_eq!(stats.lines, 4);
    }

    #[test]
    fn test_literal_blank_does_not_cut_the_sentence() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "in.txt", "a <blank> b\n");
        let (seqs, _) = read_sentences(&path, &vocab(), &ReadOptions::default()).unwrap();
        assert_eq!(seqs[0], vec![BOS, 4, UNK, 5, EOS]);

        let padded = crate::data::padding::pad_to_longest(&seqs);
        assert_eq!(padded.row_tokens(0), seqs[0]);
        assert_eq!(padded.lengths(), vec![5]);
    }

    #[test]
    fn test_read_corpus_skips_long_and_keeps_tags_aligned() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CorpusPaths {
            source: write(&dir, "src", "a\na b c d\nb\n"),
            target: write(&dir, "tgt", "b\nc\nc\n"),
            src_lang: None,
            tgt_lang: Some(write(&dir, "tgt_lang", "<2de>\n<2fr>\n<2fr>\n")),
        };
        let options = ReadOptions {
            max_len: 3,
            ..Default::default()
        };
        let (store, stats) = read_corpus(&paths, &vocab(), &vocab(), &options).unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(store.len(), 2);
        assert_eq!(store.tgt_langs().unwrap(), &[vec![7], vec![8]]);
        assert_eq!(store.targets().unwrap()[1], vec![BOS, 6, EOS]);
    }

    #[test]
    fn test_read_corpus_line_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CorpusPaths {
            source: write(&dir, "src", "a\nb\n"),
            target: write(&dir, "tgt", "a\n"),
            ..Default::default()
        };
        let err = read_corpus(&paths, &vocab(), &vocab(), &ReadOptions::default()).unwrap_err();
        assert!(matches!(err, DataError::LineCountMismatch { left: 2, right: 1 }));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = read_sentences(Path::new("/nonexistent/in.txt"), &vocab(), &ReadOptions::default())
            .unwrap_err();
        assert!(matches!(err, DataError::Io { .. }));
    }
}
