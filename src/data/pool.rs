//! A corpus pool: one language pair's instances plus a circular draw cursor.
//!
//! Draws walk the pool front to back. When a draw reaches the end, the pool
//! is reshuffled and the draw continues from the new front, so a pool can be
//! sampled indefinitely while every pass sees a fresh order.

use rand::seq::SliceRandom;
use rand::Rng;

use super::instance::InstanceStore;

#[derive(Clone, Debug)]
pub struct CorpusPool {
    store: InstanceStore,
    /// Next instance to draw; always `< len()` for a non-empty pool.
    cursor: usize,
    /// Number of end-of-pool reshuffles so far.
    wraps: usize,
    /// Total instances handed out.
    drawn: usize,
}

impl CorpusPool {
    pub fn new(store: InstanceStore) -> Self {
        Self {
            store,
            cursor: 0,
            wraps: 0,
            drawn: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn wraps(&self) -> usize {
        self.wraps
    }

    pub fn drawn(&self) -> usize {
        self.drawn
    }

    pub fn store(&self) -> &InstanceStore {
        &self.store
    }

    /// Paired shuffle of every field with one permutation.
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let mut order: Vec<usize> = (0..self.store.len()).collect();
        order.shuffle(rng);
        self.store.permute(&order);
    }

    /// Append `count` instances to `out`, wrapping and reshuffling at the end.
    pub fn draw<R: Rng + ?Sized>(&mut self, count: usize, rng: &mut R, out: &mut InstanceStore) {
        let size = self.store.len();
        if size == 0 {
            return;
        }

        let mut remaining = count;
        while remaining > 0 {
            let take = remaining.min(size - self.cursor);
            out.append_range(&self.store, self.cursor..self.cursor + take);
            self.cursor += take;
            remaining -= take;

            if self.cursor == size {
                self.shuffle(rng);
                self.cursor = 0;
                self.wraps += 1;
                tracing::debug!(size, wraps = self.wraps, "pool wrapped; reshuffled");
            }
        }
        self.drawn += count;
    }
}
