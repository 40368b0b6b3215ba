//! AVL structural invariants under churn.

#[cfg(test)]
mod tests {
    use crate::entry::{Entry, Order};
    use crate::ranked::{AvlCollection, RankedCollection};
    use rand::{Rng, SeedableRng, rngs::StdRng};

    #[test]
    fn invariants_hold_under_random_updates() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut tree = AvlCollection::new(Order::Descending);
        for step in 0..2_000 {
            tree.upsert(Entry::new(rng.random_range(0..300), f64::from(rng.random_range(0i32..1000))));
            if step % 100 == 0 {
                assert!(tree.check_invariants(), "step {step}");
            }
        }
        assert!(tree.check_invariants());
    }

    #[test]
    fn sequential_inserts_stay_logarithmic() {
        let mut tree = AvlCollection::new(Order::Ascending);
        for id in 0..4_096u64 {
            tree.upsert(Entry::new(id, id as f64));
        }
        assert!(tree.check_invariants());
        // AVL height bound: < 1.45 log2(n + 2).
        assert!(tree.height() <= 18, "height {}", tree.height());
        assert_eq!(tree.rank_of(0), Some(1));
        assert_eq!(tree.rank_of(4_095), Some(4_096));
    }

    #[test]
    fn rebuild_produces_balanced_tree() {
        let mut tree = AvlCollection::new(Order::Descending);
        tree.rebuild((0..1_000u64).map(|id| Entry::new(id, (id % 17) as f64)).collect());
        assert!(tree.check_invariants());
        assert_eq!(tree.len(), 1_000);
        tree.upsert(Entry::new(5, 100.0));
        assert!(tree.check_invariants());
        assert_eq!(tree.rank_of(5), Some(1));
    }

    #[test]
    fn moving_every_entry_keeps_sizes_consistent() {
        let mut tree = AvlCollection::new(Order::Descending);
        for id in 0..200u64 {
            tree.upsert(Entry::new(id, id as f64));
        }
        for id in 0..200u64 {
            tree.upsert(Entry::new(id, -(id as f64)));
        }
        assert!(tree.check_invariants());
        assert_eq!(tree.rank_of(0), Some(1));
        assert_eq!(tree.rank_of(199), Some(200));
    }
}
