//! Sorted-array leaderboard.
//!
//! Keys live in one `Vec` kept in ranking order; a hash index maps each
//! identity to its current score so the key can be rebuilt and located by
//! binary search.

use std::collections::HashMap;

use super::{RankedCollection, canonicalize, ranked};
use crate::entry::{Entry, Identity, Order, RankedEntry, SetResult, SortKey};

pub struct TableCollection {
    order: Order,
    sorted: Vec<SortKey>,
    scores: HashMap<Identity, f64>,
}

impl TableCollection {
    pub fn new(order: Order) -> Self {
        Self {
            order,
            sorted: Vec::new(),
            scores: HashMap::new(),
        }
    }

    fn position(&self, id: Identity, score: f64) -> Option<usize> {
        self.sorted
            .binary_search(&self.order.key(Entry { id, score }))
            .ok()
    }
}

impl RankedCollection for TableCollection {
    fn order(&self) -> Order {
        self.order
    }

    fn upsert(&mut self, entry: Entry) -> SetResult {
        let previous = self
            .scores
            .get(&entry.id)
            .copied()
            .and_then(|score| self.position(entry.id, score).map(|pos| (pos, score)));

        if let Some((pos, score)) = previous {
            if score.to_bits() == entry.score.to_bits() {
                return SetResult {
                    prev_rank: Some(pos + 1),
                    prev_score: Some(score),
                    new_rank: pos + 1,
                    new_score: score,
                };
            }
            self.sorted.remove(pos);
        }

        let key = self.order.key(entry);
        let pos = self.sorted.binary_search(&key).unwrap_or_else(|p| p);
        self.sorted.insert(pos, key);
        self.scores.insert(entry.id, entry.score);

        SetResult {
            prev_rank: previous.map(|(p, _)| p + 1),
            prev_score: previous.map(|(_, s)| s),
            new_rank: pos + 1,
            new_score: entry.score,
        }
    }

    fn get(&self, id: Identity) -> Option<RankedEntry> {
        let score = *self.scores.get(&id)?;
        let pos = self.position(id, score)?;
        Some(ranked(Entry { id, score }, pos))
    }

    fn top(&self, n: usize) -> Vec<RankedEntry> {
        self.sorted
            .iter()
            .take(n)
            .enumerate()
            .map(|(i, key)| ranked(self.order.entry(*key), i))
            .collect()
    }

    fn len(&self) -> usize {
        self.sorted.len()
    }

    fn clear(&mut self) {
        self.sorted.clear();
        self.scores.clear();
    }

    fn entries(&self) -> Vec<Entry> {
        self.sorted.iter().map(|key| self.order.entry(*key)).collect()
    }

    fn rebuild(&mut self, entries: Vec<Entry>) {
        let entries = canonicalize(self.order, entries);
        self.scores = entries.iter().map(|e| (e.id, e.score)).collect();
        self.sorted = entries.into_iter().map(|e| self.order.key(e)).collect();
    }
}
