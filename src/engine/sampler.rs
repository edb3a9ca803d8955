//! Round-robin sampler over the fixed watch-list.
//!
//! Batches are drawn from a shuffled working copy of the list. Every item is
//! served exactly once per pool cycle; when the pool runs out mid-batch it is
//! reshuffled and the items already in the batch go to the tail of the new
//! pool, so a single batch never repeats an item.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

use crate::types::Item;

#[derive(Debug)]
struct PoolState {
    pool: Vec<Item>,
    cursor: usize,
    rng: StdRng,
}

/// Shared by every worker; one mutex guards the working copy.
#[derive(Debug)]
pub struct ItemSampler {
    items: Vec<Item>,
    state: Mutex<PoolState>,
}

impl ItemSampler {
    pub fn new(items: Vec<Item>) -> Self {
        Self::with_rng(items, StdRng::from_entropy())
    }

    /// Deterministic shuffles for tests.
    pub fn with_seed(items: Vec<Item>, seed: u64) -> Self {
        Self::with_rng(items, StdRng::seed_from_u64(seed))
    }

    fn with_rng(items: Vec<Item>, mut rng: StdRng) -> Self {
        let mut pool = items.clone();
        pool.shuffle(&mut rng);
        Self {
            items,
            state: Mutex::new(PoolState {
                pool,
                cursor: 0,
                rng,
            }),
        }
    }

    /// Total watch-list size.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Up to `n` distinct items. `n >= len()` returns the whole list in its
    /// original order.
    pub fn next_batch(&self, n: usize) -> Vec<Item> {
        if n >= self.items.len() {
            return self.items.clone();
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut batch: Vec<Item> = Vec::with_capacity(n);

        while batch.len() < n {
            if state.cursor >= state.pool.len() {
                let taken: HashSet<u64> = batch.iter().map(|i| i.item_id).collect();
                state.reshuffle(&self.items, &taken);
                debug!(pool = state.pool.len(), carried = taken.len(), "Watch pool reshuffled");
            }
            let item = state.pool[state.cursor].clone();
            state.cursor += 1;
            batch.push(item);
        }

        batch
    }
}

impl PoolState {
    /// New shuffled pool with `taken` items moved to the tail.
    fn reshuffle(&mut self, items: &[Item], taken: &HashSet<u64>) {
        let mut fresh = items.to_vec();
        fresh.shuffle(&mut self.rng);
        let (mut head, tail): (Vec<Item>, Vec<Item>) = fresh
            .into_iter()
            .partition(|item| !taken.contains(&item.item_id));
        head.extend(tail);
        self.pool = head;
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(n: u64) -> Vec<Item> {
        (1..=n).map(Item::watched).collect()
    }

    fn ids(batch: &[Item]) -> Vec<u64> {
        batch.iter().map(|i| i.item_id).collect()
    }

    fn assert_distinct(batch: &[Item]) {
        let set: HashSet<u64> = batch.iter().map(|i| i.item_id).collect();
        assert_eq!(set.len(), batch.len(), "duplicate in {:?}", ids(batch));
    }

    #[test]
    fn test_five_items_batch_of_three() {
        let sampler = ItemSampler::with_seed(items(5), 7);

        let first = sampler.next_batch(3);
        assert_eq!(first.len(), 3);
        assert_distinct(&first);

        let second = sampler.next_batch(3);
        assert_eq!(second.len(), 3);
        assert_distinct(&second);

        // the first two of the second batch complete the first pool cycle
        let mut cycle: Vec<u64> = ids(&first);
        cycle.extend(ids(&second[..2]));
        cycle.sort_unstable();
        assert_eq!(cycle, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_full_cycle_covers_every_item_once() {
        let sampler = ItemSampler::with_seed(items(12), 42);
        let mut seen: Vec<u64> = Vec::new();
        for _ in 0..3 {
            let batch = sampler.next_batch(4);
            assert_distinct(&batch);
            seen.extend(ids(&batch));
        }
        seen.sort_unstable();
        assert_eq!(seen, (1..=12).collect::<Vec<_>>());
    }

    #[test]
    fn test_no_duplicates_across_many_batches() {
        let sampler = ItemSampler::with_seed(items(7), 1);
        for _ in 0..50 {
            assert_distinct(&sampler.next_batch(5));
        }
    }

    #[test]
    fn test_batch_at_least_len_returns_original_order() {
        let sampler = ItemSampler::with_seed(items(4), 3);
        assert_eq!(ids(&sampler.next_batch(4)), vec![1, 2, 3, 4]);
        assert_eq!(ids(&sampler.next_batch(10)), vec![1, 2, 3, 4]);
        assert_eq!(sampler.len(), 4);
    }

    #[test]
    fn test_empty_sampler() {
        let sampler = ItemSampler::new(Vec::new());
        assert!(sampler.is_empty());
        assert!(sampler.next_batch(3).is_empty());
    }

    #[test]
    fn test_zero_batch_is_empty() {
        let sampler = ItemSampler::with_seed(items(3), 9);
        assert!(sampler.next_batch(0).is_empty());
    }
}
