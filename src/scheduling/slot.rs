use crate::task::Task;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

/// A single-task atomic cell. Used both as the per-CPU
/// immediate-successor slot and as the payload cell of a polling slot.
///
/// Depositing is a compare-and-swap against empty, so a producer can
/// never overwrite a parked task; taking is an unconditional swap by the
/// owner. Both sides are lock-free.
#[derive(Debug)]
pub(crate) struct AtomicTaskSlot {
    task: AtomicPtr<Task>,
}

impl AtomicTaskSlot {
    pub(crate) fn new() -> Self {
        Self {
            task: AtomicPtr::new(ptr::null_mut()),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.task.load(Ordering::Acquire).is_null()
    }

    /// Park a task in the slot if it is empty. Returns the task back on a
    /// lost race.
    pub(crate) fn try_deposit(&self, task: Arc<Task>) -> Result<(), Arc<Task>> {
        let raw = Arc::into_raw(task) as *mut Task;
        match self
            .task
            .compare_exchange(ptr::null_mut(), raw, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(_) => Err(unsafe { Arc::from_raw(raw) }),
        }
    }

    /// Deposit into a slot the caller knows is empty (single-producer
    /// protocols). Panics if the slot is occupied.
    pub(crate) fn deposit(&self, task: Arc<Task>) {
        if let Err(task) = self.try_deposit(task) {
            panic!("task slot occupied (task {:?})", task);
        }
    }

    pub(crate) fn take(&self) -> Option<Arc<Task>> {
        let raw = self.task.swap(ptr::null_mut(), Ordering::AcqRel);
        if raw.is_null() {
            None
        } else {
            Some(unsafe { Arc::from_raw(raw) })
        }
    }
}

impl Drop for AtomicTaskSlot {
    fn drop(&mut self) {
        let _ = self.take();
    }
}

/// The one-shot cell a worker publishes before it idles so producers can
/// hand it a task directly, bypassing the queues.
#[derive(Debug)]
pub(crate) struct PollingSlot {
    cell: AtomicTaskSlot,
}

impl PollingSlot {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            cell: AtomicTaskSlot::new(),
        })
    }

    pub(crate) fn deposit(&self, task: Arc<Task>) {
        self.cell.deposit(task);
    }

    pub(crate) fn take(&self) -> Option<Arc<Task>> {
        self.cell.take()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.cell.is_empty()
    }
}

/// The scheduler-side registration point for the (at most one) published
/// polling slot. Claiming races are resolved with compare-and-swap; the
/// slot's refcount travels through the raw pointer.
#[derive(Debug)]
pub(crate) struct PublishedPollingSlot {
    slot: AtomicPtr<PollingSlot>,
}

impl PublishedPollingSlot {
    pub(crate) fn new() -> Self {
        Self {
            slot: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Publish a worker's slot. At most one slot may be published at a
    /// time; the caller must hold the scheduler lock.
    pub(crate) fn publish(&self, slot: &Arc<PollingSlot>) {
        let raw = Arc::into_raw(Arc::clone(slot)) as *mut PollingSlot;
        let previous = self.slot.swap(raw, Ordering::AcqRel);
        assert!(previous.is_null(), "second polling slot published");
    }

    pub(crate) fn is_occupied(&self) -> bool {
        !self.slot.load(Ordering::Acquire).is_null()
    }

    /// Atomically claim the published slot, if any.
    pub(crate) fn claim(&self) -> Option<Arc<PollingSlot>> {
        let mut current = self.slot.load(Ordering::Acquire);
        loop {
            if current.is_null() {
                return None;
            }
            match self.slot.compare_exchange(
                current,
                ptr::null_mut(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(unsafe { Arc::from_raw(current) }),
                Err(actual) => current = actual,
            }
        }
    }

    /// The owner withdraws its slot. Fails when a producer claimed it
    /// first, in which case a task is in flight to the slot.
    pub(crate) fn withdraw(&self, slot: &Arc<PollingSlot>) -> bool {
        let raw = Arc::as_ptr(slot) as *mut PollingSlot;
        if self
            .slot
            .compare_exchange(raw, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            unsafe { drop(Arc::from_raw(raw)) };
            true
        } else {
            false
        }
    }
}

impl Drop for PublishedPollingSlot {
    fn drop(&mut self) {
        let raw = self.slot.swap(ptr::null_mut(), Ordering::AcqRel);
        if !raw.is_null() {
            unsafe { drop(Arc::from_raw(raw)) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskFlags, TaskInfo};
    use static_assertions::assert_impl_all;

    assert_impl_all!(AtomicTaskSlot: Send, Sync);
    assert_impl_all!(PollingSlot: Send, Sync);
    assert_impl_all!(PublishedPollingSlot: Send, Sync);

    fn dummy_task() -> Arc<Task> {
        Task::new(
            TaskInfo::new(|_, _| {}),
            None,
            TaskFlags::empty(),
            None,
            None,
        )
    }

    #[test]
    fn deposit_take_round_trip() {
        let slot = AtomicTaskSlot::new();
        let task = dummy_task();
        slot.deposit(task.clone());
        assert!(!slot.is_empty());

        let taken = slot.take().unwrap();
        assert!(Arc::ptr_eq(&task, &taken));
        assert!(slot.take().is_none());
    }

    #[test]
    fn second_deposit_loses_the_race() {
        let slot = AtomicTaskSlot::new();
        slot.deposit(dummy_task());
        assert!(slot.try_deposit(dummy_task()).is_err());
    }

    #[test]
    fn claimed_slot_cannot_be_withdrawn() {
        let published = PublishedPollingSlot::new();
        let slot = PollingSlot::new();

        published.publish(&slot);
        let claimed = published.claim().expect("slot was published");
        assert!(Arc::ptr_eq(&claimed, &slot));

        // The owner's withdraw must now fail: a producer owns the slot.
        assert!(!published.withdraw(&slot));
    }

    #[test]
    fn withdraw_succeeds_before_any_claim() {
        let published = PublishedPollingSlot::new();
        let slot = PollingSlot::new();
        published.publish(&slot);
        assert!(published.withdraw(&slot));
        assert!(published.claim().is_none());
    }
}
