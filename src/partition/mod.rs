//! # Bucket Partitioner
//!
//! Maps the single logical leaderboard onto `num_buckets` storage shards and
//! back. Membership is positional: bucket `i` holds a contiguous slice of
//! the ranking order, never a hash partition, so concatenating buckets in
//! index order reproduces the ranking.
//!
//! ## Sizing
//!
//! `n` entries over `b` buckets are spread as evenly as possible: the first
//! `n % b` buckets hold `⌈n / b⌉` entries, the rest `⌊n / b⌋`. A layout is
//! valid only while `⌈n / b⌉ ≤ max_bucket_size`; otherwise the caller must
//! grow the bucket count first.
//!
//! ## Cost model
//!
//! Every bucket is read and written whole. [`split`] walks the ranking once
//! and [`merge`] rebuilds the collection from scratch, so both are O(n).
//! [`redistribute`] is a merge followed by a split and is meant to be rare.
//!
//! Bucket counts are capped at [`MAX_BUCKETS`]; every layout allocates
//! per-bucket state and every hydration issues one read per bucket.


use thiserror::Error;
use tracing::debug;

use crate::codec::{self, CodecError, Compression};
use crate::entry::Entry;
use crate::ranked::RankedCollection;

/// Upper bound on the bucket count of any layout.
pub const MAX_BUCKETS: usize = 65_536;

/// Errors returned by partitioning operations.
#[derive(Debug, Error)]
pub enum PartitionError {
    /// The entries do not fit the bucket layout.
    #[error(
        "{entries} entries exceed capacity of {num_buckets} buckets × {max_bucket_size} entries"
    )]
    CapacityExceeded {
        entries: usize,
        num_buckets: usize,
        max_bucket_size: usize,
    },

    /// Bucket counts may only grow.
    #[error("bucket count must grow: current {current}, requested {requested}")]
    InvalidBucketCount { current: usize, requested: usize },

    /// The requested bucket count is above [`MAX_BUCKETS`].
    #[error("bucket count {requested} exceeds limit of {limit}")]
    TooManyBuckets { requested: usize, limit: usize },

    /// A stored bucket failed to decode.
    #[error("bucket {index} is corrupt: {source}")]
    CorruptBucket {
        index: usize,
        #[source]
        source: CodecError,
    },

    /// Encoding a bucket failed.
    #[error("encoding error: {0}")]
    Codec(#[from] CodecError),
}

/// Entry counts per bucket for `len` entries over `num_buckets` buckets.
pub fn bucket_sizes(len: usize, num_buckets: usize) -> Vec<usize> {
    if num_buckets == 0 {
        return Vec::new();
    }
    let base = len / num_buckets;
    let extra = len % num_buckets;
    (0..num_buckets)
        .map(|i| base + usize::from(i < extra))
        .collect()
}

/// Fails when `len` entries cannot be spread over the layout.
pub fn check_capacity(
    len: usize,
    num_buckets: usize,
    max_bucket_size: usize,
) -> Result<(), PartitionError> {
    if num_buckets == 0 || len.div_ceil(num_buckets) > max_bucket_size {
        return Err(PartitionError::CapacityExceeded {
            entries: len,
            num_buckets,
            max_bucket_size,
        });
    }
    Ok(())
}

/// Splits the ranking into `num_buckets` contiguous entry slices.
pub fn split_entries(
    collection: &dyn RankedCollection,
    num_buckets: usize,
    max_bucket_size: usize,
) -> Result<Vec<Vec<Entry>>, PartitionError> {
    check_capacity(collection.len(), num_buckets, max_bucket_size)?;

    let mut entries = collection.entries().into_iter();
    Ok(bucket_sizes(collection.len(), num_buckets)
        .into_iter()
        .map(|n| entries.by_ref().take(n).collect())
        .collect())
}

/// Splits the ranking into `num_buckets` encoded payloads.
pub fn split(
    collection: &dyn RankedCollection,
    num_buckets: usize,
    max_bucket_size: usize,
    compression: Compression,
) -> Result<Vec<Vec<u8>>, PartitionError> {
    split_entries(collection, num_buckets, max_bucket_size)?
        .iter()
        .map(|slice| codec::encode_payload(slice, compression).map_err(PartitionError::from))
        .collect()
}

/// Rebuilds `collection` from payloads in bucket-index order.
///
/// `None` stands for a bucket that was never written and counts as empty.
/// A single undecodable bucket fails the whole merge and leaves
/// `collection` untouched.
pub fn merge(
    payloads: &[Option<Vec<u8>>],
    compression: Compression,
    collection: &mut dyn RankedCollection,
) -> Result<(), PartitionError> {
    let mut entries = Vec::new();
    for (index, payload) in payloads.iter().enumerate() {
        let Some(data) = payload else {
            continue;
        };
        let decoded = codec::decode_payload(data, compression)
            .map_err(|source| PartitionError::CorruptBucket { index, source })?;
        entries.extend(decoded);
    }
    debug!(
        buckets = payloads.len(),
        entries = entries.len(),
        "merged bucket payloads"
    );
    collection.rebuild(entries);
    Ok(())
}

/// Re-derives payloads for a larger bucket count.
///
/// Both bounds are checked before anything is allocated.
///
/// The collection is already the merged view of every bucket, so the merge
/// half of the operation happened at hydration time.
pub fn redistribute(
    collection: &dyn RankedCollection,
    current: usize,
    requested: usize,
    max_bucket_size: usize,
    compression: Compression,
) -> Result<Vec<Vec<u8>>, PartitionError> {
    if requested <= current {
        return Err(PartitionError::InvalidBucketCount { current, requested });
    }
    if requested > MAX_BUCKETS {
        return Err(PartitionError::TooManyBuckets {
            requested,
            limit: MAX_BUCKETS,
        });
    }
    split(collection, requested, max_bucket_size, compression)
}
