mod tests_state;

use crate::scheduler::FlushTarget;
use crossbeam::channel::{self, Receiver, Sender};
use std::time::Instant;

/// Records every timer firing.
pub struct Recorder {
    fired: Sender<Instant>,
}

impl Recorder {
    pub fn new() -> (Self, Receiver<Instant>) {
        let (fired, rx) = channel::unbounded();
        (Self { fired }, rx)
    }
}

impl FlushTarget for Recorder {
    fn flush_due(&self) {
        let _ = self.fired.send(Instant::now());
    }
}
