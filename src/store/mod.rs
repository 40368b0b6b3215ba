//! # Store Facade
//!
//! [`RankStore`] is the per-name handle wiring the ranked collection, the
//! bucket partitioner, the persistence gateway and the write scheduler
//! together.
//!
//! ## Locking
//!
//! - `state` (`RwLock`) guards the collection and the bucket layout.
//!   Mutations take it exclusively, reads share it, so a read never
//!   observes a half-applied mutation.
//! - `flush_lock` (`Mutex`) serialises flushes, redistribution and clear.
//!   It is always acquired *before* `state`, and `state` is never held
//!   across backing-store I/O except during first-access hydration.
//!
//! ## Flush path
//!
//! A flush snapshots every bucket payload under the read lock, drops the
//! lock, and writes only buckets whose payload differs byte-for-byte from
//! the last one written for the current epoch. A checksum is not enough
//! here: every sealed payload ends in its own CRC32, so the CRC32 of any
//! uncompressed payload is the same constant. The manifest is written
//! first whenever the stored one is stale.
//!
//! Transient backend failures are retried with backoff. Any other flush
//! failure stalls the scheduler until the next mutation or manual flush.
//!
//! ## Hydration
//!
//! Entries written under a larger `max_bucket_size` may not fit the
//! stored bucket count. Hydration then grows the layout to the smallest
//! count that holds them and marks the manifest stale.

#[cfg(test)]
mod tests;

use std::sync::{
    Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
    atomic::{AtomicBool, Ordering},
};

use tracing::{debug, error, info, trace, warn};

use crate::codec;
use crate::entry::{Entry, Identity, Order, RankedEntry, SetResult};
use crate::gateway::{Gateway, Manifest};
use crate::partition::{self, MAX_BUCKETS};
use crate::ranked::RankedCollection;
use crate::scheduler::{FlushState, FlushTarget, Scheduler};
use crate::{StoreConfig, StoreError};

// ------------------------------------------------------------------------------------------------
// Shared state
// ------------------------------------------------------------------------------------------------

struct StoreState {
    collection: Box<dyn RankedCollection>,
    manifest: Manifest,
    /// Whether the backend holds exactly `manifest`.
    manifest_stored: bool,
    /// Last payload written per bucket of the current epoch.
    written: Vec<Option<Vec<u8>>>,
    hydrated: bool,
}

/// Bucket writes captured under the read lock.
struct Snapshot {
    epoch: u64,
    manifest: Option<Manifest>,
    writes: Vec<(usize, Vec<u8>)>,
}

struct StoreShared {
    config: StoreConfig,
    order: Order,
    gateway: Gateway,
    scheduler: Scheduler,
    state: RwLock<StoreState>,
    flush_lock: Mutex<()>,
    empty_payload: Vec<u8>,
    closed: AtomicBool,
}

// ------------------------------------------------------------------------------------------------
// RankStore
// ------------------------------------------------------------------------------------------------

/// Handle to one named leaderboard.
///
/// Cloning is cheap; every clone addresses the same store. Obtain handles
/// through [`Registry::get_rank_store`](crate::Registry::get_rank_store).
///
/// All methods block the calling thread on backing-store I/O where noted.
/// The first call that needs the leaderboard hydrates it from the backend.
#[derive(Clone)]
pub struct RankStore {
    shared: Arc<StoreShared>,
}

impl std::fmt::Debug for RankStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RankStore")
            .field("name", &self.shared.config.name)
            .field("state", &self.shared.scheduler.state())
            .field("stalled", &self.shared.scheduler.is_stalled())
            .field("closed", &self.shared.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl RankStore {
    /// Creates a store and starts its flush timer. Performs no I/O.
    pub(crate) fn open(config: StoreConfig, gateway: Gateway) -> Result<Self, StoreError> {
        config.validate()?;

        let order = Order::from_ascending(config.ascending);
        let empty_payload = codec::encode_payload(&[], config.compression)?;
        let scheduler = Scheduler::new(&config.name, config.lazy_save_time, gateway.retry_policy());
        let state = StoreState {
            collection: config.data_structure.build(order),
            manifest: Manifest::new(0, config.num_buckets),
            manifest_stored: false,
            written: Vec::new(),
            hydrated: false,
        };

        let shared = Arc::new(StoreShared {
            config,
            order,
            gateway,
            scheduler,
            state: RwLock::new(state),
            flush_lock: Mutex::new(()),
            empty_payload,
            closed: AtomicBool::new(false),
        });

        let target: Weak<StoreShared> = Arc::downgrade(&shared);
        shared
            .scheduler
            .start(target)
            .map_err(|e| StoreError::Internal(format!("failed to spawn flush timer: {e}")))?;

        info!(
            store = %shared.config.name,
            buckets = shared.config.num_buckets,
            max_bucket_size = shared.config.max_bucket_size,
            data_structure = shared.config.data_structure.name(),
            compression = shared.config.compression.name(),
            lazy_save_time = ?shared.config.lazy_save_time,
            "rank store created"
        );
        Ok(Self { shared })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    pub fn order(&self) -> Order {
        self.shared.order
    }

    pub fn flush_state(&self) -> FlushState {
        self.shared.scheduler.state()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    // --------------------------------------------------------------------------------------------
    // Mutations
    // --------------------------------------------------------------------------------------------

    /// Inserts `id` or moves it to `score`, returning its rank before and after.
    ///
    /// The update is applied in memory and succeeds even if persisting it
    /// later fails. With lazy saving disabled the store is flushed before
    /// returning; a failure there is logged and retried in the background.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidArgument`] if `score` is not finite.
    /// - [`StoreError::CapacityExceeded`] if `id` is new and the layout is full.
    pub fn set_score(&self, id: Identity, score: f64) -> Result<SetResult, StoreError> {
        self.check_open()?;
        if !score.is_finite() {
            return Err(StoreError::InvalidArgument(format!(
                "score must be finite, got {score}"
            )));
        }
        self.shared.ensure_hydrated()?;

        let result = {
            let mut state = self.shared.write()?;
            if !state.collection.contains(id) {
                partition::check_capacity(
                    state.collection.len() + 1,
                    state.manifest.num_buckets,
                    self.shared.config.max_bucket_size,
                )?;
            }
            let result = state.collection.upsert(Entry::new(id, score));
            self.shared.scheduler.mark_dirty();
            result
        };
        trace!(store = %self.name(), id, score, prev_rank = ?result.prev_rank, new_rank = result.new_rank, "score set");

        if self.shared.scheduler.is_synchronous() {
            if let Err(e) = self.shared.flush() {
                warn!(store = %self.name(), error = %e, "synchronous flush failed");
            }
        }
        Ok(result)
    }

    /// Grows the bucket count to `num_buckets` and rewrites every bucket.
    ///
    /// This is O(n) in the leaderboard size and meant to be rare.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidArgument`] unless `num_buckets` exceeds the current count.
    /// - [`StoreError::CapacityExceeded`] if the entries still do not fit.
    /// - [`StoreError::Gateway`] if persisting the new layout fails; the new
    ///   layout stays in effect and is retried in the background.
    pub fn update_num_buckets(&self, num_buckets: usize) -> Result<(), StoreError> {
        self.check_open()?;
        self.shared.ensure_hydrated()?;

        let _flush = self.shared.lock_flush()?;
        let snapshot = {
            let mut state = self.shared.write()?;
            let current = state.manifest.num_buckets;
            let payloads = partition::redistribute(
                state.collection.as_ref(),
                current,
                num_buckets,
                self.shared.config.max_bucket_size,
                self.shared.config.compression,
            )?;

            state.manifest.num_buckets = num_buckets;
            state.manifest_stored = false;
            state.written = vec![None; num_buckets];
            self.shared.scheduler.mark_dirty();

            info!(store = %self.name(), from = current, to = num_buckets, entries = state.collection.len(), "redistributing buckets");
            Snapshot {
                epoch: state.manifest.epoch,
                manifest: Some(state.manifest),
                writes: payloads.into_iter().enumerate().collect(),
            }
        };

        if self.shared.scheduler.begin() {
            let outcome = self.shared.write_snapshot(snapshot);
            self.shared.settle(&outcome);
            outcome?;
        }
        Ok(())
    }

    /// Empties the leaderboard by advancing its epoch.
    ///
    /// Old-epoch buckets are abandoned in the backend, not deleted. Pending
    /// unflushed mutations are discarded.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.check_open()?;
        self.shared.ensure_hydrated()?;

        let _flush = self.shared.lock_flush()?;
        let current = self.shared.read()?.manifest;
        let next = self.shared.gateway.advance_epoch(&self.shared.config.name, current)?;

        let mut state = self.shared.write()?;
        state.collection.clear();
        state.manifest = next;
        state.manifest_stored = true;
        state.written = vec![Some(self.shared.empty_payload.clone()); next.num_buckets];
        self.shared.scheduler.reset();
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Reads
    // --------------------------------------------------------------------------------------------

    /// Looks up `id` with its current rank.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if `id` has no score.
    pub fn get_entry(&self, id: Identity) -> Result<RankedEntry, StoreError> {
        self.check_open()?;
        self.shared.ensure_hydrated()?;
        self.shared
            .read()?
            .collection
            .get(id)
            .ok_or(StoreError::NotFound(id))
    }

    /// Up to `n` entries from the head of the ranking.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidArgument`] if `n` is zero.
    pub fn get_top_scores(&self, n: usize) -> Result<Vec<RankedEntry>, StoreError> {
        self.check_open()?;
        if n == 0 {
            return Err(StoreError::InvalidArgument("n must be positive".into()));
        }
        self.shared.ensure_hydrated()?;
        Ok(self.shared.read()?.collection.top(n))
    }

    /// Number of entries.
    pub fn len(&self) -> Result<usize, StoreError> {
        self.check_open()?;
        self.shared.ensure_hydrated()?;
        Ok(self.shared.read()?.collection.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Bucket count currently in effect.
    pub fn num_buckets(&self) -> Result<usize, StoreError> {
        self.check_open()?;
        self.shared.ensure_hydrated()?;
        Ok(self.shared.read()?.manifest.num_buckets)
    }

    /// Epoch currently addressed in the backend.
    pub fn epoch(&self) -> Result<u64, StoreError> {
        self.check_open()?;
        self.shared.ensure_hydrated()?;
        Ok(self.shared.read()?.manifest.epoch)
    }

    // --------------------------------------------------------------------------------------------
    // Persistence
    // --------------------------------------------------------------------------------------------

    /// Persists pending mutations now. A no-op when nothing is dirty.
    ///
    /// # Errors
    ///
    /// [`StoreError::Gateway`] if the backend write fails after retries.
    /// The mutations stay pending and a background retry is scheduled.
    pub fn flush_buffer(&self) -> Result<(), StoreError> {
        self.check_open()?;
        self.shared.flush().map(|_| ())
    }

    /// Stops the flush timer and persists pending mutations.
    ///
    /// Later calls on any clone return [`StoreError::Closed`]. Calling
    /// `close` more than once is harmless.
    pub fn close(&self) -> Result<(), StoreError> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shared.scheduler.shutdown();
        self.shared.flush()?;
        info!(store = %self.name(), "rank store closed");
        Ok(())
    }

    fn check_open(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Internals
// ------------------------------------------------------------------------------------------------

impl StoreShared {
    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Internal("state lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Internal("state lock poisoned".into()))
    }

    fn lock_flush(&self) -> Result<MutexGuard<'_, ()>, StoreError> {
        self.flush_lock
            .lock()
            .map_err(|_| StoreError::Internal("flush lock poisoned".into()))
    }

    /// Loads the leaderboard from the backend on first access.
    ///
    /// A corrupt bucket or manifest fails hydration as a whole; the next
    /// access tries again.
    fn ensure_hydrated(&self) -> Result<(), StoreError> {
        if self.read()?.hydrated {
            return Ok(());
        }
        let mut state = self.write()?;
        if state.hydrated {
            return Ok(());
        }

        let name = &self.config.name;
        let stored = self.gateway.read_manifest(name)?;
        let manifest = match stored {
            Some(m) => Manifest::new(m.epoch, m.num_buckets.max(self.config.num_buckets)),
            None => Manifest::new(0, self.config.num_buckets),
        };
        let payloads = self
            .gateway
            .read_all(name, manifest.epoch, manifest.num_buckets)?;
        partition::merge(&payloads, self.config.compression, state.collection.as_mut())?;

        let entries = state.collection.len();
        let max_bucket_size = self.config.max_bucket_size;
        partition::check_capacity(entries, MAX_BUCKETS, max_bucket_size)?;
        let needed = entries.div_ceil(max_bucket_size);
        let manifest = if needed > manifest.num_buckets {
            warn!(
                store = %name,
                entries,
                max_bucket_size,
                from = manifest.num_buckets,
                to = needed,
                "stored entries exceed bucket layout, growing"
            );
            Manifest::new(manifest.epoch, needed)
        } else {
            manifest
        };

        let mut written: Vec<Option<Vec<u8>>> = payloads
            .into_iter()
            .map(|p| Some(p.unwrap_or_else(|| self.empty_payload.clone())))
            .collect();
        written.resize(manifest.num_buckets, None);
        state.written = written;
        state.manifest = manifest;
        state.manifest_stored = stored == Some(manifest);
        state.hydrated = true;

        info!(
            store = %name,
            epoch = manifest.epoch,
            buckets = manifest.num_buckets,
            entries = state.collection.len(),
            "leaderboard hydrated"
        );
        Ok(())
    }

    /// Runs one flush cycle. Returns `false` when there was nothing to flush.
    fn flush(&self) -> Result<bool, StoreError> {
        let _flush = self.lock_flush()?;
        if !self.scheduler.begin() {
            return Ok(false);
        }
        let outcome = self.snapshot().and_then(|s| self.write_snapshot(s));
        self.settle(&outcome);
        outcome.map(|_| true)
    }

    /// Reports a flush outcome to the scheduler.
    fn settle(&self, outcome: &Result<(), StoreError>) {
        match outcome {
            Ok(()) => self.scheduler.complete(true),
            Err(e) if e.is_transient() => self.scheduler.complete(false),
            Err(e) => {
                error!(store = %self.config.name, error = %e, "flush cannot succeed by retrying");
                self.scheduler.stall();
            }
        }
    }

    /// Derives every bucket and keeps those that changed since their last write.
    fn snapshot(&self) -> Result<Snapshot, StoreError> {
        let state = self.read()?;
        let payloads = partition::split(
            state.collection.as_ref(),
            state.manifest.num_buckets,
            self.config.max_bucket_size,
            self.config.compression,
        )?;
        let writes: Vec<(usize, Vec<u8>)> = payloads
            .into_iter()
            .enumerate()
            .filter(|(i, payload)| {
                state.written.get(*i).and_then(Option::as_deref) != Some(payload.as_slice())
            })
            .collect();
        Ok(Snapshot {
            epoch: state.manifest.epoch,
            manifest: (!state.manifest_stored).then_some(state.manifest),
            writes,
        })
    }

    fn write_snapshot(&self, snapshot: Snapshot) -> Result<(), StoreError> {
        let name = &self.config.name;
        if let Some(manifest) = snapshot.manifest {
            self.gateway.write_manifest(name, manifest)?;
        }
        self.gateway
            .write_all(name, snapshot.epoch, &snapshot.writes, self.config.parallel)?;
        debug!(
            store = %name,
            epoch = snapshot.epoch,
            buckets_written = snapshot.writes.len(),
            manifest_written = snapshot.manifest.is_some(),
            "flush complete"
        );

        let mut state = self.write()?;
        if state.manifest.epoch != snapshot.epoch {
            return Ok(());
        }
        if snapshot.manifest == Some(state.manifest) {
            state.manifest_stored = true;
        }
        for (index, payload) in snapshot.writes {
            if let Some(slot) = state.written.get_mut(index) {
                *slot = Some(payload);
            }
        }
        Ok(())
    }
}

impl FlushTarget for StoreShared {
    fn flush_due(&self) {
        if let Err(e) = self.flush() {
            warn!(store = %self.config.name, error = %e, "scheduled flush failed");
        }
    }
}

impl Drop for StoreShared {
    fn drop(&mut self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.scheduler.shutdown();
        if let Err(e) = self.flush() {
            error!(store = %self.config.name, error = %e, "pending mutations lost on drop");
        }
    }
}
