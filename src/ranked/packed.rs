//! Packed byte-string leaderboard.
//!
//! The leaderboard is one contiguous buffer of 16-byte records in ranking
//! order, laid out exactly like a payload body. Nothing is decoded until a
//! query touches it: top-N decodes N records, while identity lookups scan
//! the id column. Every mutation rebuilds the buffer, so writes cost O(n).

use super::{RankedCollection, canonicalize, ranked};
use crate::codec::{self, CodecError, RECORD_SIZE};
use crate::entry::{Entry, Identity, Order, RankedEntry, SetResult};

pub struct PackedCollection {
    order: Order,
    records: Vec<u8>,
}

impl PackedCollection {
    pub fn new(order: Order) -> Self {
        Self {
            order,
            records: Vec::new(),
        }
    }

    /// Size of the packed buffer in bytes.
    pub fn packed_len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    fn count(&self) -> usize {
        self.records.len() / RECORD_SIZE
    }

    #[inline]
    fn id_at(&self, index: usize) -> Identity {
        let start = index * RECORD_SIZE;
        let mut id = [0u8; 8];
        id.copy_from_slice(&self.records[start..start + 8]);
        u64::from_le_bytes(id)
    }

    #[inline]
    fn entry_at(&self, index: usize) -> Entry {
        let start = index * RECORD_SIZE + 8;
        let mut bits = [0u8; 8];
        bits.copy_from_slice(&self.records[start..start + 8]);
        Entry {
            id: self.id_at(index),
            score: f64::from_bits(u64::from_le_bytes(bits)),
        }
    }

    fn find(&self, id: Identity) -> Option<usize> {
        (0..self.count()).find(|&i| self.id_at(i) == id)
    }

    /// Insertion point for `entry` once the record at `skip` is removed.
    ///
    /// Keys are unique, so the skipped record is counted by the search
    /// exactly when it sorts before `entry`.
    fn insertion_point(&self, entry: Entry, skip: Option<usize>) -> usize {
        let key = self.order.key(entry);
        let (mut lo, mut hi) = (0, self.count());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.order.key(self.entry_at(mid)) < key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        match skip {
            Some(s) if s < lo => lo - 1,
            _ => lo,
        }
    }

    fn encode_record(entry: Entry, out: &mut Vec<u8>) {
        out.extend_from_slice(&entry.id.to_le_bytes());
        out.extend_from_slice(&entry.score.to_bits().to_le_bytes());
    }
}

impl RankedCollection for PackedCollection {
    fn order(&self) -> Order {
        self.order
    }

    fn upsert(&mut self, entry: Entry) -> SetResult {
        let previous = self.find(entry.id).map(|i| (i, self.entry_at(i).score));

        if let Some((i, score)) = previous {
            if score.to_bits() == entry.score.to_bits() {
                return SetResult {
                    prev_rank: Some(i + 1),
                    prev_score: Some(score),
                    new_rank: i + 1,
                    new_score: score,
                };
            }
        }

        let skip = previous.map(|(i, _)| i);
        let target = self.insertion_point(entry, skip);

        let mut next = Vec::with_capacity(self.records.len() + RECORD_SIZE);
        let mut written = 0;
        for i in 0..self.count() {
            if Some(i) == skip {
                continue;
            }
            if written == target {
                Self::encode_record(entry, &mut next);
                written += 1;
            }
            let start = i * RECORD_SIZE;
            next.extend_from_slice(&self.records[start..start + RECORD_SIZE]);
            written += 1;
        }
        if written == target {
            Self::encode_record(entry, &mut next);
        }
        self.records = next;

        SetResult {
            prev_rank: previous.map(|(i, _)| i + 1),
            prev_score: previous.map(|(_, s)| s),
            new_rank: target + 1,
            new_score: entry.score,
        }
    }

    fn get(&self, id: Identity) -> Option<RankedEntry> {
        let index = self.find(id)?;
        Some(ranked(self.entry_at(index), index))
    }

    fn top(&self, n: usize) -> Vec<RankedEntry> {
        (0..self.count().min(n))
            .map(|i| ranked(self.entry_at(i), i))
            .collect()
    }

    fn len(&self) -> usize {
        self.count()
    }

    fn clear(&mut self) {
        self.records = Vec::new();
    }

    fn entries(&self) -> Vec<Entry> {
        (0..self.count()).map(|i| self.entry_at(i)).collect()
    }

    fn rebuild(&mut self, entries: Vec<Entry>) {
        let entries = canonicalize(self.order, entries);
        let mut records = Vec::with_capacity(entries.len() * RECORD_SIZE);
        for entry in entries {
            Self::encode_record(entry, &mut records);
        }
        self.records = records;
    }

    /// The buffer already is a payload body; only the frame is added.
    fn serialize(&self) -> Result<Vec<u8>, CodecError> {
        codec::frame_records(&self.records)
    }
}
