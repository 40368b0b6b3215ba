//! Leaderboard value types shared by every layer of the store.
//!
//! An [`Entry`] is the persisted unit: an identity and its score. Everything
//! else in this module describes how entries are ordered and how query
//! results are reported back to callers.

use ordered_float::OrderedFloat;

/// Identity of a leaderboard entry, typically a user id.
pub type Identity = u64;

/// A single `(identity, score)` pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Entry {
    /// Unique identity within a store.
    pub id: Identity,

    /// Finite score.
    pub score: f64,
}

impl Entry {
    pub fn new(id: Identity, score: f64) -> Self {
        Self { id, score }
    }
}

/// An entry together with its 1-indexed rank.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedEntry {
    pub id: Identity,
    pub rank: usize,
    pub score: f64,
}

/// Before/after snapshot returned by a score update.
///
/// `prev_rank` and `prev_score` are `None` when the identity was not
/// present before the update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetResult {
    pub prev_rank: Option<usize>,
    pub prev_score: Option<f64>,
    pub new_rank: usize,
    pub new_score: f64,
}

/// Ordering direction of a leaderboard.
///
/// Ties on score are always broken by identity ascending, in both
/// directions, so every query observes the same total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    /// Lowest score ranks first.
    Ascending,

    /// Highest score ranks first.
    #[default]
    Descending,
}

impl Order {
    pub fn from_ascending(ascending: bool) -> Self {
        if ascending {
            Self::Ascending
        } else {
            Self::Descending
        }
    }

    /// Maps an entry onto a key whose natural ordering is the ranking order.
    #[inline]
    pub(crate) fn key(self, entry: Entry) -> SortKey {
        let primary = match self {
            Self::Ascending => entry.score,
            Self::Descending => -entry.score,
        };
        SortKey {
            primary: OrderedFloat(primary),
            id: entry.id,
        }
    }

    /// Inverse of [`Order::key`]. Negation is exact, so the original score
    /// bits are recovered.
    #[inline]
    pub(crate) fn entry(self, key: SortKey) -> Entry {
        let score = match self {
            Self::Ascending => key.primary.0,
            Self::Descending => -key.primary.0,
        };
        Entry { id: key.id, score }
    }

    /// Sorts `entries` into ranking order.
    pub(crate) fn sort(self, entries: &mut [Entry]) {
        entries.sort_unstable_by_key(|e| self.key(*e));
    }
}

/// Total-order key: normalised score first, identity second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct SortKey {
    pub(crate) primary: OrderedFloat<f64>,
    pub(crate) id: Identity,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descending_orders_high_scores_first() {
        let mut entries = vec![Entry::new(1, 10.0), Entry::new(2, 30.0), Entry::new(3, 20.0)];
        Order::Descending.sort(&mut entries);
        let ids: Vec<_> = entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn ties_break_by_identity_in_both_directions() {
        for order in [Order::Ascending, Order::Descending] {
            let mut entries = vec![Entry::new(9, 5.0), Entry::new(3, 5.0), Entry::new(7, 5.0)];
            order.sort(&mut entries);
            let ids: Vec<_> = entries.iter().map(|e| e.id).collect();
            assert_eq!(ids, vec![3, 7, 9]);
        }
    }

    #[test]
    fn key_roundtrip_preserves_score_bits() {
        for score in [0.0, -0.0, 1.5, -1.5, f64::MAX, f64::MIN_POSITIVE] {
            for order in [Order::Ascending, Order::Descending] {
                let entry = Entry::new(42, score);
                let back = order.entry(order.key(entry));
                assert_eq!(back.score.to_bits(), score.to_bits());
                assert_eq!(back.id, 42);
            }
        }
    }
}
