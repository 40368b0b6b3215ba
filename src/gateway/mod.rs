//! # Persistence Gateway
//!
//! Bridges bucket payloads and the [`Backend`] key space. All keys of one
//! store share the `name:` prefix:
//!
//! | Key                     | Value                                      |
//! |-------------------------|--------------------------------------------|
//! | `name:manifest`         | `rankstore-manifest v1 <epoch> <buckets>`  |
//! | `name:<epoch>:<index>`  | codec payload of bucket `index`            |
//!
//! ## Epochs
//!
//! Clearing a store advances its epoch. Subsequent reads and writes address
//! the new epoch's keys; old-epoch keys are abandoned, never deleted, so a
//! clear costs one manifest write and no bucket writes.
//!
//! ## Retries
//!
//! Transient backend failures ([`BackendError::is_transient`]) are retried
//! under a [`RetryPolicy`] with exponential backoff. Permanent failures, and
//! transient ones that outlive the policy, surface as
//! [`GatewayError::Backend`].
//!
//! ## Parallel writes
//!
//! With `parallel` set, [`Gateway::write_all`] fans bucket writes out on
//! scoped threads and joins them all before returning. Every write is
//! attempted; the error of the lowest-indexed failing bucket is reported.
//! Sequential writes stop at the first failure.

#[cfg(test)]
mod tests;

use std::{fmt, sync::Arc, thread, time::Duration};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::{Backend, BackendError};
use crate::partition::MAX_BUCKETS;

const MANIFEST_TAG: &str = "rankstore-manifest";
const MANIFEST_VERSION: &str = "v1";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A backend request failed permanently or ran out of retries.
    #[error("backend request for '{key}' failed: {source}")]
    Backend {
        key: String,
        #[source]
        source: BackendError,
    },

    /// The manifest record could not be parsed.
    #[error("invalid manifest at '{key}': {reason}")]
    InvalidManifest { key: String, reason: String },

    /// A parallel write worker panicked.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Whether the underlying backend failure was transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend { source, .. } if source.is_transient())
    }
}

// ------------------------------------------------------------------------------------------------
// Retry policy
// ------------------------------------------------------------------------------------------------

/// Backoff schedule for transient backend failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per request, including the first. Zero behaves as one.
    pub max_attempts: u32,

    /// Delay before the first retry; doubled for each further retry.
    pub base_delay: Duration,

    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after the `failures`-th consecutive failure (1-based).
    pub fn backoff(&self, failures: u32) -> Duration {
        let shift = failures.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }
}

// ------------------------------------------------------------------------------------------------
// Manifest
// ------------------------------------------------------------------------------------------------

/// Durable per-store pointer to the live epoch and its bucket count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Manifest {
    pub epoch: u64,
    pub num_buckets: usize,
}

impl Manifest {
    pub fn new(epoch: u64, num_buckets: usize) -> Self {
        Self { epoch, num_buckets }
    }

    fn parse(key: &str, bytes: &[u8]) -> Result<Self, GatewayError> {
        let invalid = |reason: &str| GatewayError::InvalidManifest {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        let text = std::str::from_utf8(bytes).map_err(|_| invalid("not UTF-8"))?;
        let fields: Vec<&str> = text.split_ascii_whitespace().collect();
        let [tag, version, epoch, buckets] = fields.as_slice() else {
            return Err(invalid("expected four fields"));
        };
        if *tag != MANIFEST_TAG {
            return Err(invalid("unknown tag"));
        }
        if *version != MANIFEST_VERSION {
            return Err(invalid("unsupported version"));
        }
        let epoch = epoch.parse().map_err(|_| invalid("bad epoch"))?;
        let num_buckets: usize = buckets.parse().map_err(|_| invalid("bad bucket count"))?;
        if num_buckets == 0 {
            return Err(invalid("zero bucket count"));
        }
        if num_buckets > MAX_BUCKETS {
            return Err(invalid("bucket count exceeds limit"));
        }
        Ok(Self { epoch, num_buckets })
    }
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{MANIFEST_TAG} {MANIFEST_VERSION} {} {}",
            self.epoch, self.num_buckets
        )
    }
}

pub fn manifest_key(name: &str) -> String {
    format!("{name}:manifest")
}

pub fn bucket_key(name: &str, epoch: u64, index: usize) -> String {
    format!("{name}:{epoch}:{index}")
}

// ------------------------------------------------------------------------------------------------
// Gateway
// ------------------------------------------------------------------------------------------------

/// Epoch-aware access to bucket payloads in a [`Backend`].
#[derive(Clone)]
pub struct Gateway {
    backend: Arc<dyn Backend>,
    retry: RetryPolicy,
}

impl Gateway {
    pub fn new(backend: Arc<dyn Backend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Reads the manifest of `name`, or `None` for a store never persisted.
    pub fn read_manifest(&self, name: &str) -> Result<Option<Manifest>, GatewayError> {
        let key = manifest_key(name);
        match self.with_retry(&key, || self.backend.get(&key))? {
            Some(bytes) => Manifest::parse(&key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    pub fn write_manifest(&self, name: &str, manifest: Manifest) -> Result<(), GatewayError> {
        let key = manifest_key(name);
        let text = manifest.to_string();
        self.with_retry(&key, || self.backend.set(&key, text.as_bytes()))?;
        debug!(store = name, %manifest, "manifest written");
        Ok(())
    }

    /// Bumps and persists the epoch pointer, returning the new manifest.
    pub fn advance_epoch(&self, name: &str, current: Manifest) -> Result<Manifest, GatewayError> {
        let next = Manifest::new(current.epoch + 1, current.num_buckets);
        self.write_manifest(name, next)?;
        info!(store = name, from = current.epoch, to = next.epoch, "epoch advanced");
        Ok(next)
    }

    /// Fetches every bucket of `epoch` in index order; missing keys are `None`.
    pub fn read_all(
        &self,
        name: &str,
        epoch: u64,
        num_buckets: usize,
    ) -> Result<Vec<Option<Vec<u8>>>, GatewayError> {
        (0..num_buckets)
            .map(|index| {
                let key = bucket_key(name, epoch, index);
                self.with_retry(&key, || self.backend.get(&key))
            })
            .collect()
    }

    /// Writes `(index, payload)` pairs under `epoch`.
    pub fn write_all(
        &self,
        name: &str,
        epoch: u64,
        writes: &[(usize, Vec<u8>)],
        parallel: bool,
    ) -> Result<(), GatewayError> {
        if parallel && writes.len() > 1 {
            return self.write_parallel(name, epoch, writes);
        }
        for (index, payload) in writes {
            self.write_bucket(name, epoch, *index, payload)?;
        }
        Ok(())
    }

    fn write_parallel(
        &self,
        name: &str,
        epoch: u64,
        writes: &[(usize, Vec<u8>)],
    ) -> Result<(), GatewayError> {
        let outcomes: Vec<Result<(), GatewayError>> = thread::scope(|scope| {
            let handles: Vec<_> = writes
                .iter()
                .map(|(index, payload)| {
                    scope.spawn(move || self.write_bucket(name, epoch, *index, payload))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join().unwrap_or_else(|_| {
                        Err(GatewayError::Internal("bucket writer panicked".into()))
                    })
                })
                .collect()
        });

        let failed = outcomes.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            warn!(store = name, epoch, failed, total = writes.len(), "parallel bucket write failed");
        }
        outcomes.into_iter().collect()
    }

    fn write_bucket(
        &self,
        name: &str,
        epoch: u64,
        index: usize,
        payload: &[u8],
    ) -> Result<(), GatewayError> {
        let key = bucket_key(name, epoch, index);
        self.with_retry(&key, || self.backend.set(&key, payload))
    }

    fn with_retry<T>(
        &self,
        key: &str,
        mut op: impl FnMut() -> Result<T, BackendError>,
    ) -> Result<T, GatewayError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(key, attempt, ?delay, error = %e, "transient backend failure, retrying");
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(source) => {
                    return Err(GatewayError::Backend {
                        key: key.to_string(),
                        source,
                    });
                }
            }
        }
    }
}
