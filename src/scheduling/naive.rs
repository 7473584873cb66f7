use crate::executors::cpu::Cpu;
use crate::executors::cpu_manager::CpuManager;
use crate::scheduling::queues::SchedulerQueues;
use crate::scheduling::{ReadyTaskHint, SchedulerPolicy};
use crate::task::Task;
use std::sync::Arc;

/// LIFO ready queue, no extras.
#[derive(Debug)]
pub(crate) struct NaiveScheduler {
    queues: SchedulerQueues,
    cpus: Arc<CpuManager>,
}

impl NaiveScheduler {
    pub(crate) fn new(cpus: Arc<CpuManager>) -> Self {
        Self {
            queues: SchedulerQueues::new(),
            cpus,
        }
    }
}

impl SchedulerPolicy for NaiveScheduler {
    fn add_ready_task(
        &self,
        task: Arc<Task>,
        _cpu: Option<&Arc<Cpu>>,
        _hint: ReadyTaskHint,
        do_get_idle: bool,
    ) -> Option<Arc<Cpu>> {
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

    fn drain(&self) {
        self.queues.clear();
    }

    fn name(&self) -> &'static str {
        "naive"
    }
}
