//! Integration tests for the public `Registry` / `RankStore` API.
//!
//! These tests exercise the full stack (ranked collection → partitioner →
//! codec → gateway → backend) through the public `rankstore` surface only.
//!
//! ## Coverage areas
//! - **Registry**: first-writer-wins, closed-store replacement, close-all
//! - **Operations**: set/get/top-N, ordering, ties, clear
//! - **Persistence**: data survives registry restart on the filesystem backend
//! - **Redistribution**: growth keeps rankings and survives restart
//! - **Concurrency**: shared handles across threads
//!
//! ## See also
//! - [`integration_hardening`]: config boundaries and error paths

use rankstore::{
    Backend, Compression, DataStructure, FlushState, FsBackend, MemoryBackend, Registry,
    StoreConfig, StoreError,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Config whose lazy-save timer never fires during a test.
fn quiet_config(name: &str, num_buckets: usize, max_bucket_size: usize) -> StoreConfig {
    StoreConfig {
        lazy_save_time: Some(Duration::from_secs(3600)),
        ..StoreConfig::new(name, num_buckets, max_bucket_size)
    }
}

fn fs_registry(dir: &TempDir) -> Registry {
    Registry::new(Arc::new(FsBackend::open(dir.path()).unwrap()))
}

// ================================================================================================
// Registry
// ================================================================================================

/// # Scenario
/// Two callers ask for the same store name with different parameters.
///
/// # Expected behavior
/// Both get the same live store, configured by the first caller.
#[test]
fn same_name_returns_same_store() {
    let registry = Registry::new(Arc::new(MemoryBackend::new()));
    let first = registry.get_rank_store(quiet_config("weekly", 2, 10)).unwrap();
    let second = registry
        .get_rank_store(StoreConfig {
            ascending: true,
            ..quiet_config("weekly", 5, 99)
        })
        .unwrap();

    first.set_score(1, 5.0).unwrap();
    assert_eq!(second.get_entry(1).unwrap().score, 5.0);
    assert_eq!(second.config().num_buckets, 2);
    assert!(!second.config().ascending);
    assert_eq!(registry.names(), vec!["weekly".to_string()]);

    let third = registry
        .get_rank_store(StoreConfig::new("weekly", 0, 0))
        .unwrap();
    assert_eq!(third.get_entry(1).unwrap().score, 5.0);
    assert_eq!(third.config().num_buckets, 2);
}

/// # Scenario
/// An invalid configuration is passed for a name with no live store.
///
/// # Expected behavior
/// Validation still applies when a store would be created.
#[test]
fn invalid_config_rejected_for_new_store() {
    let registry = Registry::new(Arc::new(MemoryBackend::new()));
    let err = registry
        .get_rank_store(StoreConfig::new("weekly", 0, 10))
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidConfig(_)));
    assert!(registry.names().is_empty());
}

/// # Scenario
/// Stores with different names share one backend.
///
/// # Expected behavior
/// They are fully independent.
#[test]
fn different_names_are_isolated() {
    let backend = Arc::new(MemoryBackend::new());
    let registry = Registry::new(backend.clone());
    let daily = registry.get_rank_store(quiet_config("daily", 1, 10)).unwrap();
    let weekly = registry.get_rank_store(quiet_config("weekly", 1, 10)).unwrap();

    daily.set_score(1, 1.0).unwrap();
    assert!(matches!(weekly.get_entry(1), Err(StoreError::NotFound(1))));

    weekly.clear().unwrap();
    assert_eq!(daily.get_entry(1).unwrap().rank, 1);
    registry.close().unwrap();

    assert!(backend.get("daily:0:0").unwrap().is_some());
    assert!(backend.get("weekly:0:0").unwrap().is_none());
}

/// # Scenario
/// A store is closed and then requested again.
///
/// # Expected behavior
/// The registry hands out a fresh instance that re-reads persisted data.
#[test]
fn closed_store_is_replaced() {
    let registry = Registry::new(Arc::new(MemoryBackend::new()));
    let store = registry.get_rank_store(quiet_config("b", 1, 10)).unwrap();
    store.set_score(9, 3.0).unwrap();
    store.close().unwrap();

    let fresh = registry.get_rank_store(quiet_config("b", 1, 10)).unwrap();
    assert!(!fresh.is_closed());
    assert_eq!(fresh.get_entry(9).unwrap().score, 3.0);
    assert!(registry.get("b").is_some());
    assert!(registry.get("missing").is_none());
}

#[test]
fn registry_close_closes_every_store() {
    let registry = Registry::new(Arc::new(MemoryBackend::new()));
    let a = registry.get_rank_store(quiet_config("a", 1, 10)).unwrap();
    let b = registry.get_rank_store(quiet_config("b", 1, 10)).unwrap();
    registry.close().unwrap();
    assert!(a.is_closed() && b.is_closed());
    assert!(registry.names().is_empty());
    registry.close().unwrap();
}

// ================================================================================================
// Operations
// ================================================================================================

/// # Scenario
/// Descending store, `A:10, B:30, C:20`, then `A` moves to 40.
///
/// # Expected behavior
/// `get_top_scores(2)` is `[B#1 30, C#2 20]`; the move reports
/// `prev_rank 3, prev_score 10, new_rank 1, new_score 40`.
#[test]
fn leaderboard_scenario() {
    let registry = Registry::new(Arc::new(MemoryBackend::new()));
    let store = registry.get_rank_store(StoreConfig::new("scenario", 1, 10)).unwrap();
    let (a, b, c) = (1, 2, 3);
    store.set_score(a, 10.0).unwrap();
    store.set_score(b, 30.0).unwrap();
    store.set_score(c, 20.0).unwrap();

    let top: Vec<(u64, usize, f64)> = store
        .get_top_scores(2)
        .unwrap()
        .into_iter()
        .map(|e| (e.id, e.rank, e.score))
        .collect();
    assert_eq!(top, vec![(b, 1, 30.0), (c, 2, 20.0)]);

    let moved = store.set_score(a, 40.0).unwrap();
    assert_eq!(moved.prev_rank, Some(3));
    assert_eq!(moved.prev_score, Some(10.0));
    assert_eq!(moved.new_rank, 1);
    assert_eq!(moved.new_score, 40.0);
    registry.close().unwrap();
}

/// # Scenario
/// The same writes go to one store per data structure.
///
/// # Expected behavior
/// Every query returns identical results.
#[test]
fn data_structures_agree() {
    let registry = Registry::new(Arc::new(MemoryBackend::new()));
    let stores: Vec<_> = [DataStructure::Table, DataStructure::Avl, DataStructure::Packed]
        .into_iter()
        .map(|ds| {
            registry
                .get_rank_store(StoreConfig {
                    data_structure: ds,
                    ..quiet_config(ds.name(), 4, 100)
                })
                .unwrap()
        })
        .collect();

    for step in 0..600u64 {
        let id = step * 13 % 200;
        let score = ((step * 7) % 50) as f64 - 25.0;
        for store in &stores {
            store.set_score(id, score).unwrap();
        }
    }

    let reference = stores[0].get_top_scores(200).unwrap();
    for store in &stores[1..] {
        assert_eq!(store.get_top_scores(200).unwrap(), reference, "{}", store.name());
        for id in [0, 13, 199] {
            assert_eq!(store.get_entry(id).ok(), stores[0].get_entry(id).ok());
        }
    }
}

// ================================================================================================
// Persistence
// ================================================================================================

/// # Scenario
/// Write through the filesystem backend, close, and reopen in a new
/// registry.
///
/// # Expected behavior
/// Rankings are identical after restart, for both compressions.
#[test]
fn fs_backend_survives_restart() {
    for compression in [Compression::Base91, Compression::None] {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            compression,
            ..quiet_config("season", 3, 50)
        };

        let expected = {
            let registry = fs_registry(&dir);
            let store = registry.get_rank_store(config.clone()).unwrap();
            for id in 0..120 {
                store.set_score(id, (id % 17) as f64 * 1.5).unwrap();
            }
            let top = store.get_top_scores(120).unwrap();
            registry.close().unwrap();
            top
        };

        let registry = fs_registry(&dir);
        let store = registry.get_rank_store(config).unwrap();
        assert_eq!(store.get_top_scores(120).unwrap(), expected);
    }
}

/// # Scenario
/// Clear a persisted store, restart, and write again.
///
/// # Expected behavior
/// The restarted store is empty at epoch 1 and accepts new scores.
#[test]
fn clear_survives_restart() {
    let dir = TempDir::new().unwrap();
    {
        let registry = fs_registry(&dir);
        let store = registry.get_rank_store(quiet_config("b", 2, 10)).unwrap();
        store.set_score(1, 1.0).unwrap();
        store.flush_buffer().unwrap();
        store.clear().unwrap();
        registry.close().unwrap();
    }

    let registry = fs_registry(&dir);
    let store = registry.get_rank_store(quiet_config("b", 2, 10)).unwrap();
    assert_eq!(store.epoch().unwrap(), 1);
    assert!(store.is_empty().unwrap());
    assert_eq!(store.set_score(1, 2.0).unwrap().prev_rank, None);
}

/// # Scenario
/// Lazy saving disabled on the filesystem backend.
///
/// # Expected behavior
/// Each mutation is durable as soon as `set_score` returns, without any
/// explicit flush or close.
#[test]
fn sync_mode_is_durable_without_close() {
    let dir = TempDir::new().unwrap();
    let registry = fs_registry(&dir);
    let store = registry
        .get_rank_store(StoreConfig {
            lazy_save_time: None,
            ..StoreConfig::new("b", 1, 10)
        })
        .unwrap();
    store.set_score(5, 50.0).unwrap();
    assert_eq!(store.flush_state(), FlushState::Clean);

    let other = fs_registry(&dir);
    let peek = other.get_rank_store(quiet_config("b", 1, 10)).unwrap();
    assert_eq!(peek.get_entry(5).unwrap().score, 50.0);
}

// ================================================================================================
// Redistribution
// ================================================================================================

/// # Scenario
/// A full store grows from 2 to 5 buckets and is restarted.
///
/// # Expected behavior
/// Rankings are unchanged and the grown layout is kept after restart.
#[test]
fn redistribution_survives_restart() {
    let dir = TempDir::new().unwrap();
    let expected = {
        let registry = fs_registry(&dir);
        let store = registry.get_rank_store(quiet_config("b", 2, 4)).unwrap();
        for id in 0..8 {
            store.set_score(id, id as f64).unwrap();
        }
        assert!(matches!(
            store.set_score(100, 0.0),
            Err(StoreError::CapacityExceeded { .. })
        ));
        let before = store.get_top_scores(8).unwrap();
        store.update_num_buckets(5).unwrap();
        assert_eq!(store.get_top_scores(8).unwrap(), before);
        store.set_score(100, 0.0).unwrap();
        let top = store.get_top_scores(20).unwrap();
        registry.close().unwrap();
        top
    };

    let registry = fs_registry(&dir);
    let store = registry.get_rank_store(quiet_config("b", 2, 4)).unwrap();
    assert_eq!(store.num_buckets().unwrap(), 5);
    assert_eq!(store.get_top_scores(20).unwrap(), expected);
}

// ================================================================================================
// Concurrency
// ================================================================================================

/// # Scenario
/// Threads share one store via cloned handles and the registry.
///
/// # Expected behavior
/// All writes land; each thread's final score is visible.
#[test]
fn shared_handles_across_threads() {
    let registry = Arc::new(Registry::new(Arc::new(MemoryBackend::new())));
    let handles: Vec<_> = (0..6u64)
        .map(|t| {
            let registry = registry.clone();
            thread::spawn(move || {
                let store = registry.get_rank_store(quiet_config("shared", 4, 50)).unwrap();
                for round in 0..20 {
                    store.set_score(t, (t * 100 + round) as f64).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let store = registry.get("shared").unwrap();
    assert_eq!(store.len().unwrap(), 6);
    let top = store.get_top_scores(1).unwrap();
    assert_eq!((top[0].id, top[0].score), (5, 519.0));
    registry.close().unwrap();
}
