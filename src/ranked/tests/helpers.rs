use crate::entry::{Entry, Order};
use crate::ranked::{DataStructure, RankedCollection};

pub const ALL: [DataStructure; 3] = [
    DataStructure::Table,
    DataStructure::Avl,
    DataStructure::Packed,
];

/// One empty collection per strategy, labelled for assertion messages.
pub fn every_strategy(order: Order) -> Vec<(&'static str, Box<dyn RankedCollection>)> {
    ALL.iter().map(|ds| (ds.name(), ds.build(order))).collect()
}

/// Reference ranking: brute-force sort of the latest score per identity.
pub fn model_ranking(order: Order, entries: &[Entry]) -> Vec<Entry> {
    crate::ranked::canonicalize(order, entries.to_vec())
}
