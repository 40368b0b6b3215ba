//! State transitions without a running timer worker.

#[cfg(test)]
mod tests {
    use crate::gateway::RetryPolicy;
    use crate::scheduler::{FlushState, Scheduler};
    use std::time::Duration;

    fn scheduler() -> Scheduler {
        Scheduler::new("board", Some(Duration::from_secs(60)), RetryPolicy::default())
    }

    #[test]
    fn starts_clean_and_begin_is_noop() {
        let s = scheduler();
        assert_eq!(s.state(), FlushState::Clean);
        assert!(!s.begin());
        assert_eq!(s.state(), FlushState::Clean);
    }

    #[test]
    fn dirty_flush_clean_cycle() {
        let s = scheduler();
        s.mark_dirty();
        s.mark_dirty();
        assert_eq!(s.state(), FlushState::DirtyPending);
        assert!(s.begin());
        assert_eq!(s.state(), FlushState::Flushing);
        s.complete(true);
        assert_eq!(s.state(), FlushState::Clean);
    }

    #[test]
    fn mutation_during_flush_is_not_lost() {
        let s = scheduler();
        s.mark_dirty();
        assert!(s.begin());
        s.mark_dirty();
        assert_eq!(s.state(), FlushState::Flushing);
        s.complete(true);
        assert_eq!(s.state(), FlushState::DirtyPending);
        assert!(s.begin());
        s.complete(true);
        assert_eq!(s.state(), FlushState::Clean);
    }

    #[test]
    fn failed_flush_restores_dirty() {
        let s = scheduler();
        s.mark_dirty();
        assert!(s.begin());
        s.complete(false);
        assert_eq!(s.state(), FlushState::DirtyPending);
        assert!(s.begin());
    }

    #[test]
    fn reset_discards_pending_work() {
        let s = scheduler();
        s.mark_dirty();
        s.reset();
        assert_eq!(s.state(), FlushState::Clean);
        assert!(!s.begin());
    }

    #[test]
    fn synchronous_mode() {
        let s = Scheduler::new("board", None, RetryPolicy::default());
        assert!(s.is_synchronous());
        assert!(!scheduler().is_synchronous());
        s.mark_dirty();
        assert_eq!(s.state(), FlushState::DirtyPending);
    }

    #[test]
    fn state_display() {
        assert_eq!(FlushState::Clean.to_string(), "clean");
        assert_eq!(FlushState::DirtyPending.to_string(), "dirty-pending");
        assert_eq!(FlushState::Flushing.to_string(), "flushing");
    }

    #[test]
    fn shutdown_without_worker_is_harmless() {
        let s = scheduler();
        s.shutdown();
        s.shutdown();
    }

    #[test]
    fn stalled_flush_stays_dirty_until_next_attempt() {
        let s = scheduler();
        s.mark_dirty();
        assert!(s.begin());
        s.stall();
        assert_eq!(s.state(), FlushState::DirtyPending);
        assert!(s.is_stalled());

        s.mark_dirty();
        assert!(!s.is_stalled());
        assert!(s.begin());
        s.stall();
        assert!(s.begin());
        assert!(!s.is_stalled());
        s.complete(true);
        assert_eq!(s.state(), FlushState::Clean);
    }
}
