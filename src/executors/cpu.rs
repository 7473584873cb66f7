use crate::scheduling::AtomicTaskSlot;
use crate::task::taskloop;
use crate::task::Task;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::Thread;

/// Activation state of a worker CPU. Transitions happen exclusively
/// through compare-and-swap in [`crate::executors::activation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ActivationStatus {
    Uninitialized = 0,
    Enabled = 1,
    Enabling = 2,
    Disabled = 3,
    Disabling = 4,
    Shutdown = 5,
}

impl ActivationStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ActivationStatus::Uninitialized,
            1 => ActivationStatus::Enabled,
            2 => ActivationStatus::Enabling,
            3 => ActivationStatus::Disabled,
            4 => ActivationStatus::Disabling,
            5 => ActivationStatus::Shutdown,
            _ => unreachable!("corrupt activation status: {raw}"),
        }
    }
}

/// One worker CPU.
pub struct Cpu {
    system_id: usize,
    index: usize,
    status: AtomicU8,

    /// Immediate-successor slot; written by the owning worker or by a
    /// producer whose compare-and-swap observed it empty.
    pub(crate) scheduler_slot: AtomicTaskSlot,

    /// The preallocated taskloop collaborator bound to this CPU.
    collaborator: OnceLock<Arc<Task>>,

    /// Worker-thread anchor for park/unpark.
    worker_thread: OnceLock<Thread>,
    should_unpark: AtomicBool,

    /// Set while registered in the idle set, to keep the set duplicate
    /// free.
    pub(crate) idle: AtomicBool,
}

impl Cpu {
    pub(crate) fn new(system_id: usize, index: usize) -> Arc<Cpu> {
        Arc::new(Cpu {
            system_id,
            index,
            status: AtomicU8::new(ActivationStatus::Enabled as u8),
            scheduler_slot: AtomicTaskSlot::new(),
            collaborator: OnceLock::new(),
            worker_thread: OnceLock::new(),
            should_unpark: AtomicBool::new(false),
            idle: AtomicBool::new(false),
        })
    }

    pub fn system_id(&self) -> usize {
        self.system_id
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn status(&self) -> ActivationStatus {
        ActivationStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn compare_exchange_status(
        &self,
        current: ActivationStatus,
        new: ActivationStatus,
    ) -> bool {
        self.status
            .compare_exchange(
                current as u8,
                new as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn collaborator(&self) -> Arc<Task> {
        self.collaborator
            .get_or_init(taskloop::preallocate_collaborator)
            .clone()
    }

    // --- worker parking --------------------------------------------------

    pub(crate) fn register_worker_thread(&self) {
        let _ = self.worker_thread.set(std::thread::current());
    }

    /// Park the calling worker until `unpark_worker`. The unpark token is
    /// consumed, so a wake that raced the park is not lost.
    pub(crate) fn park_worker(&self) {
        while !self.should_unpark.swap(false, Ordering::AcqRel) {
            std::thread::park();
        }
    }

    pub(crate) fn unpark_worker(&self) {
        self.should_unpark.store(true, Ordering::Release);
        if let Some(thread) = self.worker_thread.get() {
            thread.unpark();
        }
    }
}

impl std::fmt::Debug for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("index", &self.index)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Cpu: Send, Sync);

    #[test]
    fn cas_transitions_respect_current_state() {
        let cpu = Cpu::new(0, 0);
        assert_eq!(cpu.status(), ActivationStatus::Enabled);
        assert!(cpu.compare_exchange_status(ActivationStatus::Enabled, ActivationStatus::Disabling));
        assert!(!cpu.compare_exchange_status(ActivationStatus::Enabled, ActivationStatus::Shutdown));
        assert_eq!(cpu.status(), ActivationStatus::Disabling);
    }

    #[test]
    fn unpark_token_is_not_lost() {
        let cpu = Cpu::new(0, 0);
        cpu.register_worker_thread();
        // Unpark before park: the token must let the park fall through.
        cpu.unpark_worker();
        cpu.park_worker();
    }
}
