//! # RankStore
//!
//! An embeddable leaderboard store. Each named store keeps its whole
//! ranking in memory in an order-statistics structure and persists it,
//! sharded into fixed-capacity **buckets**, to an external key/value
//! backend with debounced, write-minimising flushes.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use rankstore::{MemoryBackend, Registry, StoreConfig};
//!
//! let registry = Registry::new(Arc::new(MemoryBackend::new()));
//! let board = registry
//!     .get_rank_store(StoreConfig::new("weekly", 4, 1000))
//!     .unwrap();
//!
//! // Write
//! board.set_score(1, 10.0).unwrap();
//! board.set_score(2, 30.0).unwrap();
//! board.set_score(3, 20.0).unwrap();
//!
//! // Top-N, highest score first
//! let top = board.get_top_scores(2).unwrap();
//! assert_eq!((top[0].id, top[0].rank), (2, 1));
//! assert_eq!((top[1].id, top[1].rank), (3, 2));
//!
//! // Updates report the rank before and after
//! let moved = board.set_score(1, 40.0).unwrap();
//! assert_eq!((moved.prev_rank, moved.new_rank), (Some(3), 1));
//!
//! // Persist now instead of waiting for the lazy-save timer
//! board.flush_buffer().unwrap();
//!
//! // Graceful shutdown
//! registry.close().unwrap();
//! ```
//!
//! ## Features
//!
//! - **Three ranking structures**: sorted table, size-augmented AVL tree,
//!   packed byte string. All rank identically.
//! - **Bucketed persistence**: contiguous slices of the ranking, each
//!   bounded by `max_bucket_size`, redistributable to more buckets.
//! - **Lazy saving**: mutations are coalesced and flushed on a timer; only
//!   buckets whose contents changed are written.
//! - **Epoch-based clear**: clearing abandons old keys instead of deleting.
//! - **CRC32 integrity**: every bucket payload is checksummed.

pub mod backend;
pub mod codec;
pub mod entry;
pub mod gateway;
pub(crate) mod partition;
pub mod ranked;
pub(crate) mod scheduler;
pub mod store;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

pub use backend::{Backend, BackendError, FsBackend, MemoryBackend};
pub use codec::{CodecError, Compression};
pub use entry::{Entry, Identity, Order, RankedEntry, SetResult};
pub use gateway::{GatewayError, RetryPolicy};
pub use ranked::DataStructure;
pub use scheduler::FlushState;
pub use store::RankStore;

use gateway::Gateway;
use partition::PartitionError;

pub use partition::MAX_BUCKETS;

/// Lazy-save delay used by [`StoreConfig::new`].
pub const DEFAULT_LAZY_SAVE_TIME: Duration = Duration::from_secs(60);

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration of one named store.
///
/// Fixed for the lifetime of the store, except that the bucket count can
/// grow through [`RankStore::update_num_buckets`].
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use rankstore::{Compression, DataStructure, StoreConfig};
///
/// // Documented defaults
/// let config = StoreConfig::new("weekly", 8, 5000);
///
/// // Or customize
/// let config = StoreConfig {
///     lazy_save_time: Some(Duration::from_secs(5)),
///     data_structure: DataStructure::Avl,
///     compression: Compression::None,
///     ascending: true,
///     ..StoreConfig::new("speedrun", 8, 5000)
/// };
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// Store name; prefixes every backend key. Must be non-empty and must
    /// not contain `:`.
    pub name: String,

    /// Initial number of buckets. Must be in `1..=MAX_BUCKETS`.
    pub num_buckets: usize,

    /// Maximum entries per bucket. Must be ≥ 1.
    pub max_bucket_size: usize,

    /// Delay between the first unflushed mutation and the automatic flush.
    ///
    /// `None` disables lazy saving: every mutation flushes before
    /// returning. Default: 60 s. Must be non-zero when set.
    pub lazy_save_time: Option<Duration>,

    /// Write buckets concurrently during a flush. Default: `false`.
    pub parallel: bool,

    /// In-memory ranking structure. Default: [`DataStructure::Table`].
    pub data_structure: DataStructure,

    /// Payload compression. Default: [`Compression::Base91`].
    pub compression: Compression,

    /// Rank lowest scores first. Default: `false`.
    pub ascending: bool,
}

impl StoreConfig {
    pub fn new(name: impl Into<String>, num_buckets: usize, max_bucket_size: usize) -> Self {
        Self {
            name: name.into(),
            num_buckets,
            max_bucket_size,
            lazy_save_time: Some(DEFAULT_LAZY_SAVE_TIME),
            parallel: false,
            data_structure: DataStructure::default(),
            compression: Compression::default(),
            ascending: false,
        }
    }

    /// Entries the initial layout can hold.
    pub fn capacity(&self) -> usize {
        self.num_buckets.saturating_mul(self.max_bucket_size)
    }

    /// Validates all configuration parameters.
    pub(crate) fn validate(&self) -> Result<(), StoreError> {
        if self.name.is_empty() {
            return Err(StoreError::InvalidConfig("name must not be empty".into()));
        }
        if self.name.contains(':') {
            return Err(StoreError::InvalidConfig(
                "name must not contain ':'".into(),
            ));
        }
        if self.num_buckets == 0 {
            return Err(StoreError::InvalidConfig("num_buckets must be >= 1".into()));
        }
        if self.num_buckets > MAX_BUCKETS {
            return Err(StoreError::InvalidConfig(format!(
                "num_buckets must be <= {MAX_BUCKETS}"
            )));
        }
        if self.max_bucket_size == 0 {
            return Err(StoreError::InvalidConfig(
                "max_bucket_size must be >= 1".into(),
            ));
        }
        if self.lazy_save_time == Some(Duration::ZERO) {
            return Err(StoreError::InvalidConfig(
                "lazy_save_time must be non-zero; use None to disable lazy saving".into(),
            ));
        }
        Ok(())
    }
}

impl FromStr for DataStructure {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "table" => Ok(Self::Table),
            "avl" => Ok(Self::Avl),
            "string" => Ok(Self::Packed),
            other => Err(StoreError::InvalidConfig(format!(
                "unknown data structure '{other}'"
            ))),
        }
    }
}

impl FromStr for Compression {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "base91" => Ok(Self::Base91),
            "none" => Ok(Self::None),
            other => Err(StoreError::InvalidConfig(format!(
                "unknown compression '{other}'"
            ))),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned by [`RankStore`] and [`Registry`] operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The identity has no score in this store.
    #[error("identity {0} not found")]
    NotFound(Identity),

    /// An argument is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid configuration parameter.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// The bucket layout cannot hold the entries.
    #[error(
        "capacity exceeded: {entries} entries do not fit {num_buckets} buckets of {max_bucket_size}"
    )]
    CapacityExceeded {
        entries: usize,
        num_buckets: usize,
        max_bucket_size: usize,
    },

    /// A stored bucket failed to decode.
    #[error("bucket {index} is corrupt: {source}")]
    CorruptPayload {
        index: usize,
        #[source]
        source: CodecError,
    },

    /// Backing-store access failed.
    #[error("{0}")]
    Gateway(#[from] GatewayError),

    /// Encoding a payload failed.
    #[error("{0}")]
    Codec(#[from] CodecError),

    /// The store has been closed.
    #[error("store is closed")]
    Closed,

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// `true` when retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Gateway(e) if e.is_transient())
    }
}

impl From<PartitionError> for StoreError {
    fn from(e: PartitionError) -> Self {
        match e {
            PartitionError::CapacityExceeded {
                entries,
                num_buckets,
                max_bucket_size,
            } => Self::CapacityExceeded {
                entries,
                num_buckets,
                max_bucket_size,
            },
            PartitionError::InvalidBucketCount { current, requested } => {
                Self::InvalidArgument(format!(
                    "bucket count can only grow: current {current}, requested {requested}"
                ))
            }
            PartitionError::TooManyBuckets { requested, limit } => Self::InvalidArgument(
                format!("bucket count {requested} exceeds limit of {limit}"),
            ),
            PartitionError::CorruptBucket { index, source } => {
                Self::CorruptPayload { index, source }
            }
            PartitionError::Codec(e) => Self::Codec(e),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Registry
// ------------------------------------------------------------------------------------------------

/// Owner of the live stores of one backend, keyed by name.
///
/// The registry is an explicit object rather than process-global state:
/// create one per backend and share it (it is `Send + Sync`).
///
/// # Shutdown
///
/// [`Registry::close`] flushes and closes every store. Dropping the
/// registry without closing still attempts a final flush of each store,
/// but errors are only logged.
pub struct Registry {
    gateway: Gateway,
    stores: Mutex<HashMap<String, RankStore>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("stores", &self.names())
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Registry over `backend` with the default [`RetryPolicy`].
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self::with_retry_policy(backend, RetryPolicy::default())
    }

    pub fn with_retry_policy(backend: Arc<dyn Backend>, retry: RetryPolicy) -> Self {
        Self {
            gateway: Gateway::new(backend, retry),
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the live store named `config.name`, creating it on first use.
    ///
    /// The first caller's configuration wins: later calls with the same
    /// name return the existing store and ignore their other parameters.
    /// A closed store is replaced by a fresh instance. No backend I/O
    /// happens here; the store hydrates on first access.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidConfig`] if a new store would be created
    /// and any configuration parameter is out of range.
    pub fn get_rank_store(&self, config: StoreConfig) -> Result<RankStore, StoreError> {
        let mut stores = self.lock()?;

        if let Some(store) = stores.get(&config.name) {
            if !store.is_closed() {
                if store.config() != &config {
                    debug!(store = %config.name, "store exists, ignoring new configuration");
                }
                return Ok(store.clone());
            }
        }

        let name = config.name.clone();
        let store = RankStore::open(config, self.gateway.clone())?;
        stores.insert(name, store.clone());
        Ok(store)
    }

    /// The live store named `name`, if one was created.
    pub fn get(&self, name: &str) -> Option<RankStore> {
        self.lock().ok()?.get(name).cloned()
    }

    /// Names of all registered stores, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock()
            .map(|stores| stores.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Closes every store and empties the registry.
    ///
    /// Every store is closed even if an earlier one fails; the first error
    /// is returned.
    pub fn close(&self) -> Result<(), StoreError> {
        let stores: Vec<RankStore> = self.lock()?.drain().map(|(_, s)| s).collect();
        let mut first_error = None;
        for store in &stores {
            if let Err(e) = store.close() {
                warn!(store = %store.name(), error = %e, "close failed");
                first_error.get_or_insert(e);
            }
        }
        info!(stores = stores.len(), "registry closed");
        first_error.map_or(Ok(()), Err)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, RankStore>>, StoreError> {
        self.stores
            .lock()
            .map_err(|_| StoreError::Internal("registry lock poisoned".into()))
    }
}
