use crate::backend::MemoryBackend;
use crate::gateway::RetryPolicy;
use crate::{Registry, StoreConfig};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times; only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Retries quickly so failure tests stay fast.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

/// Registry over a fresh memory backend.
pub fn registry() -> (Arc<MemoryBackend>, Registry) {
    registry_over(Arc::new(MemoryBackend::new()))
}

pub fn registry_over(backend: Arc<MemoryBackend>) -> (Arc<MemoryBackend>, Registry) {
    init_tracing();
    let registry = Registry::with_retry_policy(backend.clone(), fast_retry());
    (backend, registry)
}

/// Lazy config whose timer never fires during a test.
pub fn lazy_config(name: &str, num_buckets: usize, max_bucket_size: usize) -> StoreConfig {
    StoreConfig {
        lazy_save_time: Some(Duration::from_secs(3600)),
        ..StoreConfig::new(name, num_buckets, max_bucket_size)
    }
}

/// Config that flushes on every mutation.
pub fn sync_config(name: &str, num_buckets: usize, max_bucket_size: usize) -> StoreConfig {
    StoreConfig {
        lazy_save_time: None,
        ..StoreConfig::new(name, num_buckets, max_bucket_size)
    }
}

/// Polls `cond` until it holds or `timeout` elapses.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}
