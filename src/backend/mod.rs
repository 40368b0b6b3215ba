//! # Backing Store
//!
//! The durable key/value store that bucket payloads and manifests live in is
//! an external collaborator. This module fixes its contract as the
//! [`Backend`] trait and ships two implementations:
//!
//! - [`MemoryBackend`]: a process-local map with optional value-size limit,
//!   operation counters and fault injection. Used by tests and as a
//!   volatile store for short-lived leaderboards.
//! - [`FsBackend`]: one file per key in a directory, replaced atomically.
//!
//! ## Error model
//!
//! [`BackendError::Throttled`] and [`BackendError::Unavailable`] are
//! *transient*: the same request may succeed later and callers are expected
//! to retry with backoff. Every other variant is permanent for the request
//! that produced it.


mod fs;

pub use fs::FsBackend;

use std::{
    collections::HashMap,
    io,
    sync::{
        Mutex, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    thread,
    time::Duration,
};
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by backing-store operations.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The store rejected the request due to rate limiting.
    #[error("request throttled")]
    Throttled,

    /// The value is larger than the store accepts.
    #[error("value of {len} bytes exceeds limit of {limit} bytes")]
    SizeExceeded { len: usize, limit: usize },

    /// The store could not be reached.
    #[error("backing store unavailable: {0}")]
    Unavailable(String),

    /// Local I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal invariant violation (poisoned lock).
    #[error("internal error: {0}")]
    Internal(String),
}

impl BackendError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Throttled | Self::Unavailable(_))
    }
}

// ------------------------------------------------------------------------------------------------
// Backend trait
// ------------------------------------------------------------------------------------------------

/// Durable get/set-by-key store.
///
/// Implementations must be safe to call from several threads at once;
/// parallel bucket writes issue concurrent `set` calls on distinct keys.
pub trait Backend: Send + Sync {
    /// Fetches the value stored under `key`, or `None` if the key was never
    /// written.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &[u8]) -> Result<(), BackendError>;
}

// ------------------------------------------------------------------------------------------------
// MemoryBackend
// ------------------------------------------------------------------------------------------------

/// Failure kinds that [`MemoryBackend`] can inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Throttled,
    Unavailable,
    /// A permanent failure; never retried.
    Rejected,
}

impl Fault {
    fn into_error(self) -> BackendError {
        match self {
            Self::Throttled => BackendError::Throttled,
            Self::Unavailable => BackendError::Unavailable("injected fault".to_string()),
            Self::Rejected => BackendError::Internal("injected permanent fault".to_string()),
        }
    }
}

#[derive(Debug, Default)]
struct FaultPlan {
    sets: Option<(usize, Fault)>,
    gets: Option<(usize, Fault)>,
}

impl FaultPlan {
    fn take(slot: &mut Option<(usize, Fault)>) -> Option<BackendError> {
        let (remaining, fault) = slot.as_mut()?;
        *remaining -= 1;
        let fault = *fault;
        if *remaining == 0 {
            *slot = None;
        }
        Some(fault.into_error())
    }
}

/// In-process [`Backend`] backed by a hash map.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: RwLock<HashMap<String, Vec<u8>>>,
    max_value_size: Option<usize>,
    latency: Option<Duration>,
    faults: Mutex<FaultPlan>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects values larger than `limit` bytes with [`BackendError::SizeExceeded`].
    pub fn with_max_value_size(mut self, limit: usize) -> Self {
        self.max_value_size = Some(limit);
        self
    }

    /// Sleeps for `latency` inside every `set`, emulating a remote store.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Makes the next `n` calls to `set` fail with `fault`.
    pub fn fail_next_sets(&self, n: usize, fault: Fault) {
        if let Ok(mut plan) = self.faults.lock() {
            plan.sets = (n > 0).then_some((n, fault));
        }
    }

    /// Makes the next `n` calls to `get` fail with `fault`.
    pub fn fail_next_gets(&self, n: usize, fault: Fault) {
        if let Ok(mut plan) = self.faults.lock() {
            plan.gets = (n > 0).then_some((n, fault));
        }
    }

    /// Number of successful `get` calls.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Acquire)
    }

    /// Number of successful `set` calls.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Acquire)
    }

    /// Stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .data
            .read()
            .map(|data| data.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    fn injected(&self, sets: bool) -> Result<(), BackendError> {
        let mut plan = self
            .faults
            .lock()
            .map_err(|_| BackendError::Internal("fault plan lock poisoned".into()))?;
        let slot = if sets { &mut plan.sets } else { &mut plan.gets };
        match FaultPlan::take(slot) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Backend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        self.injected(false)?;
        let data = self
            .data
            .read()
            .map_err(|_| BackendError::Internal("data lock poisoned".into()))?;
        self.reads.fetch_add(1, Ordering::AcqRel);
        Ok(data.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), BackendError> {
        if let Some(latency) = self.latency {
            thread::sleep(latency);
        }
        self.injected(true)?;
        if let Some(limit) = self.max_value_size {
            if value.len() > limit {
                return Err(BackendError::SizeExceeded {
                    len: value.len(),
                    limit,
                });
            }
        }
        let mut data = self
            .data
            .write()
            .map_err(|_| BackendError::Internal("data lock poisoned".into()))?;
        data.insert(key.to_string(), value.to_vec());
        self.writes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}
