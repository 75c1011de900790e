//! Balanced, length-sorted batch scheduling over one or more corpus pools.
//!
//! Iteration works in maxi-batches. At the start of each maxi-batch every pool
//! contributes the same number of instances (`batch_size * maxibatch_size /
//! num_pools`), the combined buffer is sorted by source length (longest first)
//! and then sliced into `maxibatch_size` consecutive batches. Sorting inside a
//! maxi-batch keeps the padding in each batch small while the equal per-pool
//! share keeps small language pairs from being drowned out by large ones.
//!
//! ```text
//! pool 0 ──draw(share)──┐
//! pool 1 ──draw(share)──┼──► buffer ──sort by len desc──► [b0 | b1 | … | b(M-1)]
//! pool k ──draw(share)──┘
//! ```
//!
//! An epoch is `n_batch` calls; the call after the last batch returns
//! [`BatchError::EpochDone`] and resets the counter so the next epoch can
//! begin. Pool cursors are not rewound between epochs.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_BATCH_SIZE, DEFAULT_MAXIBATCH_SIZE, DEFAULT_SEED};
use crate::error::{BatchError, ConfigError};

use super::batch::Batch;
use super::instance::{BatchShape, InstanceStore};
use super::pool::CorpusPool;

/// Scheduler configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Instances per batch.
    pub batch_size: usize,

    /// Batches per maxi-batch.
    pub maxibatch_size: usize,

    /// Shuffle every pool once at construction.
    pub shuffle: bool,

    /// Length-sorted maxi-batch iteration. When false, only single-corpus
    /// in-order iteration is available.
    pub sort_by_length: bool,

    /// Seed for all shuffles.
    pub seed: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            maxibatch_size: DEFAULT_MAXIBATCH_SIZE,
            shuffle: true,
            sort_by_length: true,
            seed: DEFAULT_SEED,
        }
    }
}

impl SchedulerConfig {
    /// In-order, unshuffled iteration used for translation and evaluation.
    pub fn sequential(batch_size: usize) -> Self {
        Self {
            batch_size,
            shuffle: false,
            sort_by_length: false,
            ..Default::default()
        }
    }
}

pub struct BatchScheduler {
    pools: Vec<CorpusPool>,
    config: SchedulerConfig,
    shape: BatchShape,
    balanced: bool,
    n_batch: usize,
    iter_count: usize,
    /// Per-pool draw per maxi-batch.
    share: usize,
    /// Current sorted maxi-batch.
    buffer: InstanceStore,
    rng: StdRng,
}

impl BatchScheduler {
    /// Scheduler drawing equally from every pool.
    pub fn balanced(pools: Vec<InstanceStore>, config: SchedulerConfig) -> Result<Self, ConfigError> {
        Self::build(pools, config, true)
    }

    /// Scheduler over a single corpus.
    ///
    /// With `sort_by_length` this is the balanced scheduler with one pool;
    /// without it, batches are consecutive slices in corpus order and the
    /// last batch may be short.
    pub fn single(store: InstanceStore, config: SchedulerConfig) -> Result<Self, ConfigError> {
        Self::build(vec![store], config, false)
    }

    fn build(
        stores: Vec<InstanceStore>,
        config: SchedulerConfig,
        balanced: bool,
    ) -> Result<Self, ConfigError> {
        if config.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if config.maxibatch_size == 0 {
            return Err(ConfigError::ZeroMaxibatchSize);
        }
        let first = stores.first().ok_or(ConfigError::NoPools)?;
        let shape = first.shape();
        let has_targets = first.has_targets();
        if stores
            .iter()
            .any(|s| s.shape() != shape || s.has_targets() != has_targets)
        {
            return Err(ConfigError::MixedShapes);
        }

        let total: usize = stores.iter().map(InstanceStore::len).sum();
        if total < config.batch_size {
            return Err(ConfigError::BatchLargerThanCorpus {
                batch_size: config.batch_size,
                corpus_size: total,
            });
        }

        let sequential = !config.sort_by_length && !balanced;
        let per_maxibatch = config.batch_size * config.maxibatch_size;
        let num_pools = stores.len();

        let (share, n_batch) = if sequential {
            (0, total.div_ceil(config.batch_size))
        } else {
            if per_maxibatch % num_pools != 0 {
                return Err(ConfigError::IndivisibleShare {
                    total: per_maxibatch,
                    num_pools,
                });
            }
            let share = per_maxibatch / num_pools;
            if let Some((pool, store)) = stores.iter().enumerate().find(|(_, s)| s.len() < share) {
                return Err(ConfigError::PoolTooSmall {
                    pool,
                    size: store.len(),
                    share,
                });
            }
            let n_batch = total
                .div_ceil(config.batch_size)
                .div_ceil(config.maxibatch_size)
                * config.maxibatch_size;
            (share, n_batch)
        };

        let buffer = first.empty_like();
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut pools: Vec<CorpusPool> = stores.into_iter().map(CorpusPool::new).collect();
        if config.shuffle {
            for pool in &mut pools {
                pool.shuffle(&mut rng);
            }
        }

        tracing::info!(
            pools = pools.len(),
            instances = total,
            n_batch,
            share,
            ?shape,
            "batch scheduler ready"
        );

        Ok(Self {
            pools,
            config,
            shape,
            balanced,
            n_batch,
            iter_count: 0,
            share,
            buffer,
            rng,
        })
    }

    /// Batches per epoch.
    pub fn n_batch(&self) -> usize {
        self.n_batch
    }

    /// Instances served per epoch (`n_batch * batch_size`).
    ///
    /// In sequential mode the last batch may be short, so fewer instances are
    /// actually served.
    pub fn nb_examples(&self) -> usize {
        self.n_batch * self.config.batch_size
    }

    pub fn shape(&self) -> BatchShape {
        self.shape
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn num_pools(&self) -> usize {
        self.pools.len()
    }

    /// Instances drawn from each pool since construction.
    pub fn drawn_per_pool(&self) -> Vec<usize> {
        self.pools.iter().map(CorpusPool::drawn).collect()
    }

    /// End-of-pool reshuffles per pool since construction.
    pub fn wraps_per_pool(&self) -> Vec<usize> {
        self.pools.iter().map(CorpusPool::wraps).collect()
    }

    /// Calls already made in the current epoch.
    pub fn position(&self) -> usize {
        self.iter_count
    }

    /// Restart the current epoch from batch 0.
    pub fn reset(&mut self) {
        self.iter_count = 0;
    }

    /// Produce the next batch of the epoch.
    pub fn next_batch(&mut self) -> Result<Batch, BatchError> {
        if self.balanced && !self.config.sort_by_length {
            return Err(BatchError::Unsupported("unsorted balanced iteration"));
        }
        if self.iter_count >= self.n_batch {
            tracing::debug!(n_batch = self.n_batch, "epoch finished");
            self.iter_count = 0;
            return Err(BatchError::EpochDone);
        }

        let batch_idx = self.iter_count;
        self.iter_count += 1;

        if !self.config.sort_by_length {
            return Ok(self.sequential_batch(batch_idx));
        }

        let slot = batch_idx % self.config.maxibatch_size;
        if slot == 0 {
            self.refill();
        }
        let start = slot * self.config.batch_size;
        Ok(Batch::from_store(&self.buffer, start..start + self.config.batch_size))
    }

    /// Iterator over the remaining batches of the current epoch.
    pub fn epoch(&mut self) -> Epoch<'_> {
        Epoch { scheduler: self }
    }

    fn sequential_batch(&self, batch_idx: usize) -> Batch {
        let store = self.pools[0].store();
        let start = batch_idx * self.config.batch_size;
        let end = (start + self.config.batch_size).min(store.len());
        Batch::from_store(store, start..end)
    }

    fn refill(&mut self) {
        self.buffer = self.pools[0].store().empty_like();
        for pool in &mut self.pools {
            pool.draw(self.share, &mut self.rng, &mut self.buffer);
        }
        let order = length_order(self.buffer.sources());
        self.buffer.permute(&order);
        tracing::trace!(instances = self.buffer.len(), "maxi-batch refilled");
    }
}

/// Indices ordering `seqs` by length, longest first; equal lengths keep their
/// original relative order.
pub fn length_order(seqs: &[Vec<u32>]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..seqs.len()).collect();
    order.sort_by_key(|&i| std::cmp::Reverse(seqs[i].len()));
    order
}

/// One epoch of batches. Stops at the end-of-epoch signal; unsupported
/// configurations surface as an `Err` item.
pub struct Epoch<'a> {
    scheduler: &'a mut BatchScheduler,
}

impl Iterator for Epoch<'_> {
    type Item = Result<Batch, BatchError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.scheduler.next_batch() {
            Err(BatchError::EpochDone) => None,
            other => Some(other),
        }
    }
}
