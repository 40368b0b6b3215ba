//! Size-augmented AVL tree.
//!
//! Every node caches its height and the size of its subtree, so the rank of
//! a key is the sum of left-subtree sizes along the search path. Insert,
//! remove and rank are all O(log n).

use std::cmp::Ordering;
use std::collections::HashMap;

use super::{RankedCollection, canonicalize, ranked};
use crate::entry::{Entry, Identity, Order, RankedEntry, SetResult, SortKey};

type Link = Option<Box<Node>>;

struct Node {
    key: SortKey,
    height: u8,
    size: usize,
    left: Link,
    right: Link,
}

impl Node {
    fn leaf(key: SortKey) -> Box<Self> {
        Box::new(Self {
            key,
            height: 1,
            size: 1,
            left: None,
            right: None,
        })
    }

    #[inline]
    fn update(&mut self) {
        self.height = 1 + height(&self.left).max(height(&self.right));
        self.size = 1 + size(&self.left) + size(&self.right);
    }

    #[inline]
    fn balance(&self) -> i16 {
        i16::from(height(&self.left)) - i16::from(height(&self.right))
    }
}

#[inline]
fn height(link: &Link) -> u8 {
    link.as_ref().map_or(0, |n| n.height)
}

#[inline]
fn size(link: &Link) -> usize {
    link.as_ref().map_or(0, |n| n.size)
}

// ------------------------------------------------------------------------------------------------
// Rotations
// ------------------------------------------------------------------------------------------------

fn rotate_right(mut node: Box<Node>) -> Box<Node> {
    let Some(mut pivot) = node.left.take() else {
        return node;
    };
    node.left = pivot.right.take();
    node.update();
    pivot.right = Some(node);
    pivot.update();
    pivot
}

fn rotate_left(mut node: Box<Node>) -> Box<Node> {
    let Some(mut pivot) = node.right.take() else {
        return node;
    };
    node.right = pivot.left.take();
    node.update();
    pivot.left = Some(node);
    pivot.update();
    pivot
}

fn rebalance(mut node: Box<Node>) -> Box<Node> {
    node.update();
    let balance = node.balance();
    if balance > 1 {
        if let Some(left) = node.left.take() {
            node.left = Some(if left.balance() < 0 {
                rotate_left(left)
            } else {
                left
            });
        }
        return rotate_right(node);
    }
    if balance < -1 {
        if let Some(right) = node.right.take() {
            node.right = Some(if right.balance() > 0 {
                rotate_right(right)
            } else {
                right
            });
        }
        return rotate_left(node);
    }
    node
}

// ------------------------------------------------------------------------------------------------
// Insert / remove
// ------------------------------------------------------------------------------------------------

/// Keys are unique per identity, so an equal key never reaches here.
fn insert(link: Link, key: SortKey) -> Box<Node> {
    match link {
        None => Node::leaf(key),
        Some(mut node) => {
            if key < node.key {
                node.left = Some(insert(node.left.take(), key));
            } else {
                node.right = Some(insert(node.right.take(), key));
            }
            rebalance(node)
        }
    }
}

fn remove(link: Link, key: &SortKey) -> (Link, bool) {
    let Some(mut node) = link else {
        return (None, false);
    };
    let removed = match key.cmp(&node.key) {
        Ordering::Less => {
            let (left, removed) = remove(node.left.take(), key);
            node.left = left;
            removed
        }
        Ordering::Greater => {
            let (right, removed) = remove(node.right.take(), key);
            node.right = right;
            removed
        }
        Ordering::Equal => {
            let replacement = match (node.left.take(), node.right.take()) {
                (None, None) => None,
                (Some(child), None) | (None, Some(child)) => Some(child),
                (Some(left), Some(right)) => {
                    let (rest, mut successor) = take_min(right);
                    successor.left = Some(left);
                    successor.right = rest;
                    Some(rebalance(successor))
                }
            };
            return (replacement, true);
        }
    };
    (Some(rebalance(node)), removed)
}

/// Detaches the minimum node of a subtree, returning `(rest, min)`.
fn take_min(mut node: Box<Node>) -> (Link, Box<Node>) {
    match node.left.take() {
        None => {
            let rest = node.right.take();
            node.update();
            (rest, node)
        }
        Some(left) => {
            let (rest, min) = take_min(left);
            node.left = rest;
            (Some(rebalance(node)), min)
        }
    }
}

/// Number of keys strictly before `key`, if `key` is present.
fn position(mut link: &Link, key: &SortKey) -> Option<usize> {
    let mut before = 0;
    while let Some(node) = link {
        match key.cmp(&node.key) {
            Ordering::Less => link = &node.left,
            Ordering::Equal => return Some(before + size(&node.left)),
            Ordering::Greater => {
                before += size(&node.left) + 1;
                link = &node.right;
            }
        }
    }
    None
}

/// Balanced tree over already-sorted keys.
fn build_sorted(keys: &[SortKey]) -> Link {
    if keys.is_empty() {
        return None;
    }
    let mid = keys.len() / 2;
    let mut node = Node::leaf(keys[mid]);
    node.left = build_sorted(&keys[..mid]);
    node.right = build_sorted(&keys[mid + 1..]);
    node.update();
    Some(node)
}

// ------------------------------------------------------------------------------------------------
// In-order traversal
// ------------------------------------------------------------------------------------------------

struct InOrder<'a> {
    stack: Vec<&'a Node>,
}

impl<'a> InOrder<'a> {
    fn new(root: &'a Link) -> Self {
        let mut iter = Self {
            stack: Vec::with_capacity(usize::from(height(root))),
        };
        iter.push_left(root);
        iter
    }

    fn push_left(&mut self, mut link: &'a Link) {
        while let Some(node) = link {
            self.stack.push(node);
            link = &node.left;
        }
    }
}

impl Iterator for InOrder<'_> {
    type Item = SortKey;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.push_left(&node.right);
        Some(node.key)
    }
}

// ------------------------------------------------------------------------------------------------
// Collection
// ------------------------------------------------------------------------------------------------

pub struct AvlCollection {
    order: Order,
    root: Link,
    scores: HashMap<Identity, f64>,
}

impl AvlCollection {
    pub fn new(order: Order) -> Self {
        Self {
            order,
            root: None,
            scores: HashMap::new(),
        }
    }

    pub fn height(&self) -> u8 {
        height(&self.root)
    }

    /// Verifies ordering, balance, cached heights and cached sizes.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) -> bool {
        fn check(link: &Link, lo: Option<SortKey>, hi: Option<SortKey>) -> Option<(u8, usize)> {
            let Some(node) = link else {
                return Some((0, 0));
            };
            if lo.is_some_and(|lo| node.key <= lo) || hi.is_some_and(|hi| node.key >= hi) {
                return None;
            }
            let (lh, ls) = check(&node.left, lo, Some(node.key))?;
            let (rh, rs) = check(&node.right, Some(node.key), hi)?;
            let h = 1 + lh.max(rh);
            let s = 1 + ls + rs;
            if lh.abs_diff(rh) > 1 || node.height != h || node.size != s {
                return None;
            }
            Some((h, s))
        }
        matches!(check(&self.root, None, None), Some((_, s)) if s == self.scores.len())
    }
}

impl RankedCollection for AvlCollection {
    fn order(&self) -> Order {
        self.order
    }

    fn upsert(&mut self, entry: Entry) -> SetResult {
        let mut prev_rank = None;
        let prev_score = self.scores.get(&entry.id).copied();

        if let Some(score) = prev_score {
            let old_key = self.order.key(Entry { id: entry.id, score });
            prev_rank = position(&self.root, &old_key).map(|p| p + 1);
            if score.to_bits() == entry.score.to_bits() {
                if let Some(rank) = prev_rank {
                    return SetResult {
                        prev_rank,
                        prev_score,
                        new_rank: rank,
                        new_score: score,
                    };
                }
            }
            let (root, _) = remove(self.root.take(), &old_key);
            self.root = root;
        }

        let key = self.order.key(entry);
        self.root = Some(insert(self.root.take(), key));
        self.scores.insert(entry.id, entry.score);

        let new_rank = position(&self.root, &key).map_or(self.scores.len(), |p| p + 1);
        SetResult {
            prev_rank,
            prev_score,
            new_rank,
            new_score: entry.score,
        }
    }

    fn get(&self, id: Identity) -> Option<RankedEntry> {
        let score = *self.scores.get(&id)?;
        let entry = Entry { id, score };
        let pos = position(&self.root, &self.order.key(entry))?;
        Some(ranked(entry, pos))
    }

    fn top(&self, n: usize) -> Vec<RankedEntry> {
        InOrder::new(&self.root)
            .take(n)
            .enumerate()
            .map(|(i, key)| ranked(self.order.entry(key), i))
            .collect()
    }

    fn len(&self) -> usize {
        size(&self.root)
    }

    fn clear(&mut self) {
        self.root = None;
        self.scores.clear();
    }

    fn entries(&self) -> Vec<Entry> {
        InOrder::new(&self.root)
            .map(|key| self.order.entry(key))
            .collect()
    }

    fn rebuild(&mut self, entries: Vec<Entry>) {
        let entries = canonicalize(self.order, entries);
        let keys: Vec<SortKey> = entries.iter().map(|e| self.order.key(*e)).collect();
        self.scores = entries.into_iter().map(|e| (e.id, e.score)).collect();
        self.root = build_sorted(&keys);
    }
}
