use crate::executors::cpu::Cpu;
use crate::executors::cpu_manager::CpuManager;
use crate::scheduling::queues::SchedulerQueues;
use crate::scheduling::slot::{PollingSlot, PublishedPollingSlot};
use crate::scheduling::{ReadyTaskHint, SchedulerPolicy};
use crate::task::Task;
use std::sync::Arc;

/// Immediate-successor scheduling plus the polling-slot protocol: a
/// worker with nothing to do publishes its slot, and producers racing to
/// release a task claim it with a compare-and-swap and deposit the task
/// directly, bypassing both the queue and the wake-up path.
///
/// The claim is attempted twice: once without the lock (fast path), and
/// once under it, because slots are only ever published while the lock is
/// held but may be withdrawn at any time.
#[derive(Debug)]
pub(crate) struct ImmediateSuccessorWithPollingScheduler {
    queues: SchedulerQueues,
    cpus: Arc<CpuManager>,
    polling: PublishedPollingSlot,
}

impl ImmediateSuccessorWithPollingScheduler {
    pub(crate) fn new(cpus: Arc<CpuManager>) -> Self {
        Self {
            queues: SchedulerQueues::new(),
            cpus,
            polling: PublishedPollingSlot::new(),
        }
    }

    /// Try to hand `task` to a polling worker. Returns it back when no
    /// slot is claimable.
    fn offer_to_poller(&self, task: Arc<Task>) -> Result<(), Arc<Task>> {
        match self.polling.claim() {
            Some(slot) => {
                slot.deposit(task);
                Ok(())
            }
            None => Err(task),
        }
    }
}

impl SchedulerPolicy for ImmediateSuccessorWithPollingScheduler {
    fn add_ready_task(
        &self,
        task: Arc<Task>,
        cpu: Option<&Arc<Cpu>>,
        hint: ReadyTaskHint,
        do_get_idle: bool,
    ) -> Option<Arc<Cpu>> {
        // 1. Immediate-successor slot of the releasing CPU.
        let task = match cpu {
            Some(cpu) if hint != ReadyTaskHint::Child => {
                match cpu.scheduler_slot.try_deposit(task) {
                    Ok(()) => return None,
                    Err(task) => task,
                }
            }
            _ => task,
        };

        // 2. A polling worker, without the lock.
        let task = match self.offer_to_poller(task) {
            Ok(()) => return None,
            Err(task) => task,
        };

        let mut state = self.queues.lock();

        // 3. Again under the lock: the slot can only have been published
        // while the lock was held by someone else.
        let task = match self.offer_to_poller(task) {
            Ok(()) => return None,
            Err(task) => task,
        };

        // 4. The queue.
        state.ready.push_front(task);
        drop(state);

        if do_get_idle {
            self.cpus.get_idle_cpu()
        } else {
            None
        }
    }

    fn task_gets_unblocked(&self, task: Arc<Task>, _cpu: Option<&Arc<Cpu>>) {
        let task = match self.offer_to_poller(task) {
            Ok(()) => return,
            Err(task) => task,
        };

        let mut state = self.queues.lock();
        let task = match self.offer_to_poller(task) {
            Ok(()) => return,
            Err(task) => task,
        };
        state.unblocked.push_front(task);
    }

    fn get_ready_task(
        &self,
        cpu: &Arc<Cpu>,
        _current_task: Option<&Arc<Task>>,
        can_mark_idle: bool,
    ) -> Option<Arc<Task>> {
        if let Some(task) = cpu.scheduler_slot.take() {
            return Some(task);
        }

        let mut state = self.queues.lock();
        if let Some(task) = state.pop_replacement() {
            return Some(task);
        }
        if let Some(task) = state.pop_ready(cpu, false) {
            return Some(task);
        }
        drop(state);

        if can_mark_idle {
            self.cpus.cpu_becomes_idle(cpu);
            if let Some(task) = self.queues.pop_after_idle(cpu, false) {
                return Some(task);
            }
        }
        None
    }

    fn get_idle_compute_place(&self, force: bool) -> Option<Arc<Cpu>> {
        if force || self.queues.has_work() {
            self.cpus.get_idle_cpu()
        } else {
            None
        }
    }

    fn request_polling(&self, cpu: &Arc<Cpu>, slot: &Arc<PollingSlot>) -> bool {
        assert!(slot.is_empty());

        // 1. The immediate successor; same thread, no race on the slot.
        if let Some(task) = cpu.scheduler_slot.take() {
            slot.deposit(task);
            return true;
        }

        let mut state = self.queues.lock();

        // 2./3. Queued work.
        if let Some(task) = state.pop_replacement() {
            slot.deposit(task);
            return true;
        }
        if let Some(task) = state.pop_ready(cpu, false) {
            slot.deposit(task);
            return true;
        }

        // 4. Publish the slot, unless another worker already polls.
        if self.polling.is_occupied() {
            drop(state);
            self.cpus.cpu_becomes_idle(cpu);
            false
        } else {
            self.polling.publish(slot);
            true
        }
    }

    fn release_polling(&self, cpu: &Arc<Cpu>, slot: &Arc<PollingSlot>) -> bool {
        if self.polling.withdraw(slot) {
            self.cpus.cpu_becomes_idle(cpu);
            true
        } else {
            // Lost to a producer: a task is in flight to the slot.
            false
        }
    }

    fn uses_polling_slots(&self) -> bool {
        true
    }

    fn disable_compute_place(&self, cpu: &Arc<Cpu>) {
        if let Some(task) = cpu.scheduler_slot.take() {
            self.queues.lock().ready.push_front(task);
        }
    }

    fn drain(&self) {
        self.queues.clear();
    }

    fn name(&self) -> &'static str {
        "immediate-successor-with-polling"
    }
}
