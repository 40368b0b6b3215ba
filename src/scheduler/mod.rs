//! # Write Scheduler
//!
//! Decides *when* dirty leaderboard state is persisted, decoupling the
//! latency of a mutation from the latency of a durable write.
//!
//! ## States
//!
//! ```text
//!            mark_dirty                begin
//!   Clean ──────────────▶ DirtyPending ──────▶ Flushing
//!     ▲                        ▲                  │
//!     │   complete(ok), clean  │ complete(err) or │
//!     └────────────────────────┼──── redirtied ◀──┘
//! ```
//!
//! - A mutation moves `Clean → DirtyPending` and arms the timer for
//!   `lazy_save_time`. Further mutations do not push the deadline back.
//! - A mutation that lands while `Flushing` sets a *redirty* flag; the
//!   flush completes into `DirtyPending` and the timer is re-armed, so no
//!   write is lost.
//! - A failed flush returns to `DirtyPending` and re-arms the timer with
//!   exponential backoff from the [`RetryPolicy`].
//! - A flush that fails permanently also returns to `DirtyPending` but is
//!   *stalled*: no retry is armed until the next mutation or manual flush.
//! - A manual flush that finds the state `Clean` is a no-op.
//!
//! ## Timer worker
//!
//! Each scheduler owns one background thread (`rankstore-flush-<name>`).
//! It waits on a `crossbeam` command channel and an `after(deadline)`
//! timer, and calls [`FlushTarget::flush_due`] when the deadline passes.
//! The worker holds only a [`Weak`] reference to its target and exits once
//! the target is dropped, so the worker never keeps a store alive.

#[cfg(test)]
mod tests;

use std::{
    fmt, io,
    sync::{Mutex, MutexGuard, PoisonError, Weak},
    thread,
    time::{Duration, Instant},
};

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, trace, warn};

use crate::gateway::RetryPolicy;

/// Persistence state of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    /// Memory matches the backing store.
    Clean,

    /// Unpersisted mutations exist and a flush is scheduled.
    DirtyPending,

    /// A flush is in progress.
    Flushing,
}

impl fmt::Display for FlushState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Clean => "clean",
            Self::DirtyPending => "dirty-pending",
            Self::Flushing => "flushing",
        })
    }
}

/// Receiver of timer-driven flushes.
pub(crate) trait FlushTarget: Send + Sync {
    fn flush_due(&self);
}

enum Command {
    Arm(Instant),
    Disarm,
    Shutdown,
}

struct Worker {
    sender: Sender<Command>,
    handle: thread::JoinHandle<()>,
}

#[derive(Debug)]
struct Cycle {
    state: FlushState,
    redirty: bool,
    stalled: bool,
    failures: u32,
}

pub(crate) struct Scheduler {
    name: String,
    lazy_save_time: Option<Duration>,
    retry: RetryPolicy,
    cycle: Mutex<Cycle>,
    worker: Mutex<Option<Worker>>,
}

impl Scheduler {
    pub(crate) fn new(name: &str, lazy_save_time: Option<Duration>, retry: RetryPolicy) -> Self {
        Self {
            name: name.to_string(),
            lazy_save_time,
            retry,
            cycle: Mutex::new(Cycle {
                state: FlushState::Clean,
                redirty: false,
                stalled: false,
                failures: 0,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawns the timer worker for `target`.
    pub(crate) fn start(&self, target: Weak<dyn FlushTarget>) -> io::Result<()> {
        let (sender, receiver) = channel::unbounded();
        let handle = thread::Builder::new()
            .name(format!("rankstore-flush-{}", self.name))
            .spawn(move || run_timer(receiver, target))?;
        *lock(&self.worker) = Some(Worker { sender, handle });
        Ok(())
    }

    pub(crate) fn state(&self) -> FlushState {
        lock(&self.cycle).state
    }

    /// `true` when lazy saving is disabled and every mutation flushes inline.
    pub(crate) fn is_synchronous(&self) -> bool {
        self.lazy_save_time.is_none()
    }

    /// Records a mutation.
    pub(crate) fn mark_dirty(&self) {
        let mut cycle = lock(&self.cycle);
        match cycle.state {
            FlushState::Clean => {
                cycle.state = FlushState::DirtyPending;
                drop(cycle);
                if let Some(delay) = self.lazy_save_time {
                    trace!(store = %self.name, ?delay, "flush timer armed");
                    self.send(Command::Arm(Instant::now() + delay));
                }
            }
            FlushState::DirtyPending if cycle.stalled => {
                cycle.stalled = false;
                drop(cycle);
                if let Some(delay) = self.lazy_save_time {
                    trace!(store = %self.name, ?delay, "stalled flush re-armed");
                    self.send(Command::Arm(Instant::now() + delay));
                }
            }
            FlushState::DirtyPending => {}
            FlushState::Flushing => cycle.redirty = true,
        }
    }

    /// Enters `Flushing`. Returns `false` when there is nothing to flush.
    pub(crate) fn begin(&self) -> bool {
        let mut cycle = lock(&self.cycle);
        if cycle.state != FlushState::DirtyPending {
            return false;
        }
        cycle.state = FlushState::Flushing;
        cycle.redirty = false;
        cycle.stalled = false;
        true
    }

    /// Leaves `Flushing` after a flush attempt.
    pub(crate) fn complete(&self, ok: bool) {
        let mut cycle = lock(&self.cycle);
        if ok {
            cycle.failures = 0;
            if cycle.redirty {
                cycle.redirty = false;
                cycle.state = FlushState::DirtyPending;
                drop(cycle);
                debug!(store = %self.name, "mutations arrived during flush, re-arming");
                if let Some(delay) = self.lazy_save_time {
                    self.send(Command::Arm(Instant::now() + delay));
                }
            } else {
                cycle.state = FlushState::Clean;
                drop(cycle);
                self.send(Command::Disarm);
            }
        } else {
            cycle.failures = cycle.failures.saturating_add(1);
            cycle.redirty = false;
            cycle.state = FlushState::DirtyPending;
            let delay = self.retry.backoff(cycle.failures);
            let failures = cycle.failures;
            drop(cycle);
            warn!(store = %self.name, failures, ?delay, "flush failed, retry scheduled");
            self.send(Command::Arm(Instant::now() + delay));
        }
    }

    /// Leaves `Flushing` after a failure that retrying cannot fix.
    ///
    /// The state stays dirty but the timer is disarmed; the next mutation
    /// or manual flush tries again.
    pub(crate) fn stall(&self) {
        let mut cycle = lock(&self.cycle);
        cycle.failures = cycle.failures.saturating_add(1);
        cycle.redirty = false;
        cycle.stalled = true;
        cycle.state = FlushState::DirtyPending;
        let failures = cycle.failures;
        drop(cycle);
        warn!(store = %self.name, failures, "flush failed permanently, waiting for next mutation");
        self.send(Command::Disarm);
    }

    /// `true` after a permanent failure until the next mutation or flush.
    pub(crate) fn is_stalled(&self) -> bool {
        lock(&self.cycle).stalled
    }

    /// Drops pending work and returns to `Clean`.
    pub(crate) fn reset(&self) {
        let mut cycle = lock(&self.cycle);
        cycle.state = FlushState::Clean;
        cycle.redirty = false;
        cycle.stalled = false;
        cycle.failures = 0;
        drop(cycle);
        self.send(Command::Disarm);
    }

    /// Stops the timer worker. Idempotent.
    pub(crate) fn shutdown(&self) {
        let Some(worker) = lock(&self.worker).take() else {
            return;
        };
        let _ = worker.sender.send(Command::Shutdown);
        // The last store handle may be released by the worker itself.
        if worker.handle.thread().id() != thread::current().id() {
            let _ = worker.handle.join();
        }
        debug!(store = %self.name, "flush timer stopped");
    }

    fn send(&self, command: Command) {
        if let Some(worker) = lock(&self.worker).as_ref() {
            let _ = worker.sender.send(command);
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn run_timer(commands: Receiver<Command>, target: Weak<dyn FlushTarget>) {
    let mut deadline: Option<Instant> = None;
    loop {
        let timeout = match deadline {
            Some(at) => channel::at(at),
            None => channel::never(),
        };
        channel::select! {
            recv(commands) -> command => match command {
                Ok(Command::Arm(at)) => deadline = Some(at),
                Ok(Command::Disarm) => deadline = None,
                Ok(Command::Shutdown) | Err(_) => return,
            },
            recv(timeout) -> _ => {
                deadline = None;
                match target.upgrade() {
                    Some(target) => target.flush_due(),
                    None => return,
                }
            }
        }
    }
}
