//! polynmt: balanced multilingual batching and RNN translation.
//!
//! This is the CLI binary entry point. Models are built from a seed; there is
//! no training loop or checkpoint loading, so `translate` and `evaluate`
//! exercise the full pipeline with untrained weights.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use polynmt::config::{RunConfig, DEFAULT_MAX_SENT_LEN};
use polynmt::data::instance::InstanceStore;
use polynmt::data::lang::{split_by_target_language, Languages};
use polynmt::data::reader::{read_corpus, read_sentences, read_tags, CorpusPaths, ReadOptions};
use polynmt::data::scheduler::{BatchScheduler, SchedulerConfig};
use polynmt::data::vocab::Vocabulary;
use polynmt::decoding::translate::{DecodeStrategy, Translator};
use polynmt::eval::evaluate;
use polynmt::model::nmt::NmtModel;

/// polynmt command line.
#[derive(Parser, Debug)]
#[command(
    name = "polynmt",
    about = "Balanced multilingual batching and attention-based RNN translation",
    version
)]
struct Cli {
    /// JSON run configuration; command-line flags override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one epoch of balanced batching and report per-pool statistics.
    Batches(BatchesArgs),

    /// Translate a source file, one output line per input line.
    Translate(TranslateArgs),

    /// Report loss, accuracy and perplexity on a parallel corpus.
    Evaluate(EvaluateArgs),

    /// Build a vocabulary JSON from tokenised text.
    BuildVocab(BuildVocabArgs),
}

#[derive(Args, Debug)]
struct ReadArgs {
    /// Maximum words per sentence.
    #[arg(long, default_value_t = DEFAULT_MAX_SENT_LEN)]
    max_len: usize,

    /// Lower-case text before lookup.
    #[arg(long, default_value_t = false)]
    lower_case: bool,

    /// Trim over-long parallel instances instead of dropping them.
    #[arg(long, default_value_t = false)]
    keep_long: bool,
}

impl ReadArgs {
    fn options(&self) -> ReadOptions {
        ReadOptions {
            max_len: self.max_len,
            keep_case: !self.lower_case,
            skip_long: !self.keep_long,
        }
    }
}

#[derive(Args, Debug)]
struct CorpusArgs {
    #[arg(long)]
    src_vocab: PathBuf,

    #[arg(long)]
    tgt_vocab: PathBuf,

    /// Source file of a corpus; repeat once per corpus.
    #[arg(long = "source", required = true)]
    sources: Vec<PathBuf>,

    /// Target file of a corpus, in the same order as `--source`.
    #[arg(long = "target", required = true)]
    targets: Vec<PathBuf>,

    /// Source-language tag file, in the same order as `--source`.
    #[arg(long = "src-lang")]
    src_langs: Vec<PathBuf>,

    /// Target-language tag file, in the same order as `--source`.
    #[arg(long = "tgt-lang")]
    tgt_langs: Vec<PathBuf>,

    /// Split every corpus into pools at target-language changes.
    #[arg(long, default_value_t = false)]
    split_by_lang: bool,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    #[command(flatten)]
    read: ReadArgs,
}

#[derive(Args, Debug)]
struct BatchesArgs {
    #[command(flatten)]
    corpus: CorpusArgs,

    #[arg(long)]
    maxibatch_size: Option<usize>,
}

#[derive(Args, Debug)]
struct ModelArgs {
    #[arg(long)]
    d_model: Option<usize>,

    #[arg(long)]
    d_word_vec: Option<usize>,

    #[arg(long)]
    model_seed: Option<u64>,
}

#[derive(Args, Debug)]
struct TranslateArgs {
    #[arg(long)]
    src_vocab: PathBuf,

    #[arg(long)]
    tgt_vocab: PathBuf,

    /// Tokenised source text.
    #[arg(short, long)]
    input: PathBuf,

    /// Output file; stdout when omitted.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Source-language tag per input line.
    #[arg(long)]
    src_lang: Option<PathBuf>,

    /// Target-language tag per input line.
    #[arg(long)]
    tgt_lang: Option<PathBuf>,

    /// Start decoding from the language tag instead of BOS.
    #[arg(long, default_value_t = false)]
    lang_as_start: bool,

    /// Beam width; 1 selects greedy search.
    #[arg(long)]
    beam: Option<usize>,

    #[arg(long)]
    alpha: Option<f32>,

    #[arg(long)]
    max_steps: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[command(flatten)]
    model: ModelArgs,

    #[command(flatten)]
    read: ReadArgs,
}

#[derive(Args, Debug)]
struct EvaluateArgs {
    #[command(flatten)]
    corpus: CorpusArgs,

    #[command(flatten)]
    model: ModelArgs,
}

#[derive(Args, Debug)]
struct BuildVocabArgs {
    /// Tokenised text files.
    #[arg(long = "input", required = true)]
    inputs: Vec<PathBuf>,

    #[arg(short, long)]
    output: PathBuf,

    /// Keep words seen more than this many times.
    #[arg(long, default_value_t = 0)]
    min_count: usize,

    /// Keep only the most frequent words, reserved words included.
    #[arg(long)]
    max_size: Option<usize>,

    #[arg(long, default_value_t = false)]
    lower_case: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("polynmt=info".parse()?))
        .init();

    let cli = Cli::parse();
    tracing::info!("polynmt v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &cli.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };

    match cli.command {
        Command::Batches(args) => run_batches(&mut config, args),
        Command::Translate(args) => run_translate(&mut config, args),
        Command::Evaluate(args) => run_evaluate(&mut config, args),
        Command::BuildVocab(args) => run_build_vocab(args),
    }
}

fn progress_bar(len: usize) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );
    Ok(pb)
}

fn apply_scheduler_overrides(config: &mut SchedulerConfig, corpus: &CorpusArgs) {
    if let Some(bs) = corpus.batch_size {
        config.batch_size = bs;
    }
    if let Some(seed) = corpus.seed {
        config.seed = seed;
    }
}

fn apply_model_overrides(config: &mut RunConfig, args: &ModelArgs, src: &Vocabulary, tgt: &Vocabulary) {
    let model = &mut config.model;
    model.src_vocab_size = src.len();
    model.tgt_vocab_size = tgt.len();
    if let Some(d) = args.d_model {
        model.d_model = d;
    }
    if let Some(d) = args.d_word_vec {
        model.d_word_vec = d;
    }
    if let Some(seed) = args.model_seed {
        model.seed = seed;
    }
}

/// Read every corpus named on the command line into scheduler pools.
fn load_pools(corpus: &CorpusArgs) -> Result<(Vec<InstanceStore>, Vocabulary, Vocabulary)> {
    if corpus.sources.len() != corpus.targets.len() {
        bail!(
            "{} --source files but {} --target files",
            corpus.sources.len(),
            corpus.targets.len()
        );
    }
    for (flag, files) in [("--src-lang", &corpus.src_langs), ("--tgt-lang", &corpus.tgt_langs)] {
        if !files.is_empty() && files.len() != corpus.sources.len() {
            bail!("{flag} must be given once per corpus or not at all");
        }
    }

    let src_vocab = Vocabulary::load(&corpus.src_vocab)?;
    let tgt_vocab = Vocabulary::load(&corpus.tgt_vocab)?;
    let options = corpus.read.options();

    let mut pools = Vec::new();
    for (i, (source, target)) in corpus.sources.iter().zip(&corpus.targets).enumerate() {
        let paths = CorpusPaths {
            source: source.clone(),
            target: target.clone(),
            src_lang: corpus.src_langs.get(i).cloned(),
            tgt_lang: corpus.tgt_langs.get(i).cloned(),
        };
        let (store, _) = read_corpus(&paths, &src_vocab, &tgt_vocab, &options)
            .with_context(|| format!("reading corpus {}", source.display()))?;
        if corpus.split_by_lang {
            pools.extend(split_by_target_language(store));
        } else {
            pools.push(store);
        }
    }
    Ok((pools, src_vocab, tgt_vocab))
}

fn run_batches(config: &mut RunConfig, args: BatchesArgs) -> Result<()> {
    apply_scheduler_overrides(&mut config.scheduler, &args.corpus);
    if let Some(m) = args.maxibatch_size {
        config.scheduler.maxibatch_size = m;
    }
    let (pools, _, _) = load_pools(&args.corpus)?;
    let sizes: Vec<usize> = pools.iter().map(InstanceStore::len).collect();
    let mut scheduler = BatchScheduler::balanced(pools, config.scheduler.clone())?;

    let pb = progress_bar(scheduler.n_batch())?;
    let mut cells = 0usize;
    let mut pads = 0usize;
    for batch in scheduler.epoch() {
        let batch = batch?;
        cells += batch.source.tokens.len();
        pads += batch.source.pad_count();
        pb.inc(1);
    }
    pb.finish_and_clear();

    tracing::info!(
        n_batch = scheduler.n_batch(),
        nb_examples = scheduler.nb_examples(),
        "epoch complete"
    );
    for (i, ((size, drawn), wraps)) in sizes
        .iter()
        .zip(scheduler.drawn_per_pool())
        .zip(scheduler.wraps_per_pool())
        .enumerate()
    {
        tracing::info!(pool = i, size, drawn, wraps, "pool usage");
    }
    if cells > 0 {
        tracing::info!(
            "source padding: {:.1}% of {} cells",
            100.0 * pads as f64 / cells as f64,
            cells
        );
    }
    Ok(())
}

fn run_translate(config: &mut RunConfig, args: TranslateArgs) -> Result<()> {
    let src_vocab = Vocabulary::load(&args.src_vocab)?;
    let tgt_vocab = Vocabulary::load(&args.tgt_vocab)?;
    let options = args.read.options();

    let (sources, _) = read_sentences(&args.input, &src_vocab, &options)?;
    let mut store = InstanceStore::new(sources);
    if let Some(path) = &args.src_lang {
        store = store.with_src_langs(read_tags(path, &src_vocab, &options)?)?;
    }
    if let Some(path) = &args.tgt_lang {
        store = store.with_tgt_langs(read_tags(path, &src_vocab, &options)?)?;
    }
    let languages = Languages::from_store(&store);
    config.model.src_lang_dim = languages.src_width();
    config.model.tgt_lang_dim = languages.tgt_width();

    apply_model_overrides(config, &args.model, &src_vocab, &tgt_vocab);
    if let Some(b) = args.beam {
        config.decode.beam_width = b;
    }
    if let Some(a) = args.alpha {
        config.decode.alpha = a;
    }
    if let Some(m) = args.max_steps {
        config.decode.max_steps = m;
    }
    let batch_size = args.batch_size.unwrap_or(config.scheduler.batch_size);

    let model = NmtModel::new(config.model.clone())?;
    tracing::warn!("model weights are seeded, not trained");

    let strategy = DecodeStrategy::from_config(&config.decode);
    tracing::info!(?strategy, max_steps = config.decode.max_steps, "decoding");

    let translator = Translator::new(&model, &tgt_vocab, strategy, config.decode.max_steps)
        .with_languages(&languages)
        .with_lang_as_start(args.lang_as_start);

    let total = store.len();
    if total == 0 {
        bail!("{} has no lines to translate", args.input.display());
    }
    let mut scheduler = BatchScheduler::single(store, SchedulerConfig::sequential(batch_size.min(total)))?;
    let pb = progress_bar(total)?;

    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    let stats = translator.translate_all(&mut scheduler, &mut out, |n| pb.inc(n as u64))?;
    pb.finish_and_clear();

    tracing::info!(
        sentences = stats.sentences,
        unterminated = stats.unterminated,
        "done"
    );
    Ok(())
}

fn run_evaluate(config: &mut RunConfig, args: EvaluateArgs) -> Result<()> {
    apply_scheduler_overrides(&mut config.scheduler, &args.corpus);
    let (pools, src_vocab, tgt_vocab) = load_pools(&args.corpus)?;

    let store = pools
        .into_iter()
        .reduce(|mut acc, pool| {
            let n = pool.len();
            acc.append_range(&pool, 0..n);
            acc
        })
        .context("no evaluation data")?;
    if store.is_empty() {
        bail!("evaluation corpus is empty after filtering");
    }

    let languages = Languages::from_store(&store);
    config.model.src_lang_dim = languages.src_width();
    config.model.tgt_lang_dim = languages.tgt_width();
    apply_model_overrides(config, &args.model, &src_vocab, &tgt_vocab);
    let model = NmtModel::new(config.model.clone())?;
    tracing::warn!("model weights are seeded, not trained");

    let batch_size = config.scheduler.batch_size.min(store.len());
    let mut scheduler = BatchScheduler::single(store, SchedulerConfig::sequential(batch_size))?;
    let report = evaluate(&model, &mut scheduler, &languages)?;

    println!(
        "loss/word {:.4}  accuracy {:.2}%  ppl {:.2}  words {}",
        report.loss_per_word(),
        100.0 * report.accuracy(),
        report.perplexity(),
        report.words
    );
    Ok(())
}

fn run_build_vocab(args: BuildVocabArgs) -> Result<()> {
    let mut sentences: Vec<Vec<String>> = Vec::new();
    for path in &args.inputs {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        for line in text.lines() {
            let line = if args.lower_case {
                line.to_lowercase()
            } else {
                line.to_owned()
            };
            sentences.push(line.split_whitespace().map(str::to_owned).collect());
        }
    }
    let vocab = Vocabulary::build(&sentences, args.min_count, args.max_size);
    vocab.save(&args.output)?;
    tracing::info!(path = %args.output.display(), size = vocab.len(), "vocabulary written");
    Ok(())
}
