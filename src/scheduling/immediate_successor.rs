use crate::executors::cpu::Cpu;
use crate::executors::cpu_manager::CpuManager;
use crate::scheduling::queues::SchedulerQueues;
use crate::scheduling::{ReadyTaskHint, SchedulerPolicy};
use crate::task::Task;
use std::sync::Arc;

/// LIFO ready queue plus a per-CPU immediate-successor slot: a task
/// released on a CPU (with a non-child hint) parks in that CPU's slot and
/// is picked up by its worker with no global lock.
#[derive(Debug)]
pub(crate) struct ImmediateSuccessorScheduler {
    queues: SchedulerQueues,
    cpus: Arc<CpuManager>,
}

impl ImmediateSuccessorScheduler {
    pub(crate) fn new(cpus: Arc<CpuManager>) -> Self {
        Self {
            queues: SchedulerQueues::new(),
            cpus,
        }
    }
}

impl SchedulerPolicy for ImmediateSuccessorScheduler {
    fn add_ready_task(
        &self,
        task: Arc<Task>,
        cpu: Option<&Arc<Cpu>>,
        hint: ReadyTaskHint,
        do_get_idle: bool,
    ) -> Option<Arc<Cpu>> {
        // Tasks released mid-execution become the releasing CPU's
        // immediate successor when its slot is free.
        let task = match cpu {
            Some(cpu) if hint != ReadyTaskHint::Child => {
                match cpu.scheduler_slot.try_deposit(task) {
                    Ok(()) => return None,
                    Err(task) => task,
                }
            }
            _ => task,
        };

        self.queues.lock().ready.push_front(task);
        if do_get_idle {
            self.cpus.get_idle_cpu()
        } else {
            None
        }
    }

    fn task_gets_unblocked(&self, task: Arc<Task>, _cpu: Option<&Arc<Cpu>>) {
        self.queues.lock().unblocked.push_front(task);
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

    /// The slot handoff is not stable across disables: drain it back to
    /// the queue.
    fn disable_compute_place(&self, cpu: &Arc<Cpu>) {
        if let Some(task) = cpu.scheduler_slot.take() {
            self.queues.lock().ready.push_front(task);
        }
    }

    fn drain(&self) {
        self.queues.clear();
    }

    fn name(&self) -> &'static str {
        "immediate-successor"
    }
}
