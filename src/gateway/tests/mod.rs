
use crate::backend::MemoryBackend;
use crate::gateway::{Gateway, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;

/// Gateway over a fresh memory backend with millisecond-scale backoff.
pub fn gateway() -> (Arc<MemoryBackend>, Gateway) {
    let backend = Arc::new(MemoryBackend::new());
    let retry = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
    };
    (backend.clone(), Gateway::new(backend, retry))
}
