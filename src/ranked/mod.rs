//! # Ranked Collections
//!
//! In-memory order-statistics structures holding the whole logical
//! leaderboard of one store. Three interchangeable representations share
//! the [`RankedCollection`] contract:
//!
//! | [`DataStructure`] | Update    | Rank query | Top-N          | Memory          |
//! |-------------------|-----------|------------|----------------|-----------------|
//! | `Table`           | O(n) shift | O(log n)  | O(N)           | sorted keys + index |
//! | `Avl`             | O(log n)  | O(log n)   | O(log n + N)   | one node per entry  |
//! | `Packed`          | O(n) copy | O(n) scan  | O(N) decode    | 16 bytes per entry  |
//!
//! `Avl` suits mixed read/write workloads. `Packed` keeps the leaderboard as
//! one contiguous byte string in the payload record layout; top-N decodes
//! only the records it returns, but every insertion copies the whole
//! string.
//!
//! All strategies rank by [`Order`] with ties broken by identity ascending,
//! report 1-indexed ranks, and serialise to the same canonical payload, so
//! buckets are representation-agnostic on disk.

#[cfg(test)]
mod tests;

mod avl;
mod packed;
mod table;

use std::collections::HashMap;

pub use avl::AvlCollection;
pub use packed::PackedCollection;
pub use table::TableCollection;

use crate::codec::{self, CodecError};
use crate::entry::{Entry, Identity, Order, RankedEntry, SetResult};

// ------------------------------------------------------------------------------------------------
// RankedCollection trait
// ------------------------------------------------------------------------------------------------

/// Uniform interface over the leaderboard representations.
pub trait RankedCollection: Send + Sync {
    /// Ordering direction this collection was built with.
    fn order(&self) -> Order;

    /// Inserts `entry` or moves an existing identity to its new score.
    fn upsert(&mut self, entry: Entry) -> SetResult;

    /// Looks up an identity together with its rank.
    fn get(&self, id: Identity) -> Option<RankedEntry>;

    /// Up to `n` entries from the head of the ranking.
    fn top(&self, n: usize) -> Vec<RankedEntry>;

    fn len(&self) -> usize;

    fn clear(&mut self);

    /// Every entry in ranking order.
    fn entries(&self) -> Vec<Entry>;

    /// Replaces the contents with `entries`, in any order.
    ///
    /// When an identity appears more than once the last occurrence wins.
    fn rebuild(&mut self, entries: Vec<Entry>);

    fn rank_of(&self, id: Identity) -> Option<usize> {
        self.get(id).map(|e| e.rank)
    }

    fn contains(&self, id: Identity) -> bool {
        self.get(id).is_some()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Canonical raw payload of the whole collection.
    fn serialize(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode_entries(&self.entries())
    }

    /// Replaces the contents with a payload produced by [`serialize`](Self::serialize).
    fn deserialize(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        let entries = codec::decode_entries(bytes)?;
        self.rebuild(entries);
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// DataStructure: config-level strategy selector
// ------------------------------------------------------------------------------------------------

/// Selects the representation backing a store's leaderboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataStructure {
    /// Sorted array with binary search.
    #[default]
    Table,

    /// Size-augmented AVL tree.
    Avl,

    /// Packed byte string of fixed-width records (configured as `"string"`).
    Packed,
}

impl DataStructure {
    /// Builds an empty collection of this kind.
    pub fn build(self, order: Order) -> Box<dyn RankedCollection> {
        match self {
            Self::Table => Box::new(TableCollection::new(order)),
            Self::Avl => Box::new(AvlCollection::new(order)),
            Self::Packed => Box::new(PackedCollection::new(order)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Avl => "avl",
            Self::Packed => "string",
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Shared helpers
// ------------------------------------------------------------------------------------------------

/// Deduplicates by identity (last occurrence wins) and sorts into ranking order.
pub(crate) fn canonicalize(order: Order, entries: Vec<Entry>) -> Vec<Entry> {
    let mut latest: HashMap<Identity, usize> = HashMap::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        latest.insert(entry.id, i);
    }

    let mut unique: Vec<Entry> = if latest.len() == entries.len() {
        entries
    } else {
        entries
            .into_iter()
            .enumerate()
            .filter(|(i, e)| latest.get(&e.id) == Some(i))
            .map(|(_, e)| e)
            .collect()
    };
    order.sort(&mut unique);
    unique
}

#[inline]
pub(crate) fn ranked(entry: Entry, index: usize) -> RankedEntry {
    RankedEntry {
        id: entry.id,
        rank: index + 1,
        score: entry.score,
    }
}
