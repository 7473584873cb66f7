use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// A resettable one-shot gate. Used to park a task's thread across a
/// taskwait and to signal task completion to an external waiter.
#[derive(Debug, Default)]
pub(crate) struct WaitGate {
    open: Mutex<bool>,
    cond: Condvar,
}

impl WaitGate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_open(&self) -> bool {
        *self.open.lock()
    }

    pub(crate) fn open(&self) {
        let mut open = self.open.lock();
        *open = true;
        self.cond.notify_all();
    }

    pub(crate) fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.cond.wait(&mut open);
        }
    }

    /// Wait until the gate opens or the timeout elapses. Returns whether
    /// the gate is open.
    pub(crate) fn wait_for(&self, timeout: Duration) -> bool {
        let mut open = self.open.lock();
        if !*open {
            self.cond.wait_for(&mut open, timeout);
        }
        *open
    }

    pub(crate) fn reset(&self) {
        *self.open.lock() = false;
    }
}
