use crate::executors::cpu::Cpu;
use crate::task::taskloop;
use crate::task::Task;
use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::Arc;

/// The queue pair every scheduler variant shares: ready tasks and tasks
/// that were blocked and are runnable again. Both live under the single
/// global scheduler lock; variants differ only in which end they push.
#[derive(Debug, Default)]
pub(crate) struct SchedulerQueues {
    state: Mutex<QueueState>,
}

#[derive(Debug, Default)]
pub(crate) struct QueueState {
    pub(crate) ready: VecDeque<Arc<Task>>,
    pub(crate) unblocked: VecDeque<Arc<Task>>,
}

impl SchedulerQueues {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock()
    }

    pub(crate) fn has_work(&self) -> bool {
        let state = self.state.lock();
        !state.ready.is_empty() || !state.unblocked.is_empty()
    }

    /// Drop every queued task. Used at shutdown after the workers have
    /// drained.
    pub(crate) fn clear(&self) {
        let mut state = self.state.lock();
        state.ready.clear();
        state.unblocked.clear();
    }

    /// Re-check after registering idle: a task queued between the
    /// unlock and the idle registration would otherwise have missed its
    /// wake-up.
    pub(crate) fn pop_after_idle(&self, cpu: &Cpu, requeue_taskloop: bool) -> Option<Arc<Task>> {
        if !self.has_work() {
            return None;
        }
        let mut state = self.lock();
        state
            .pop_replacement()
            .or_else(|| state.pop_ready(cpu, requeue_taskloop))
    }
}

impl QueueState {
    /// An unblocked task takes priority over the ready queue.
    pub(crate) fn pop_replacement(&mut self) -> Option<Arc<Task>> {
        self.unblocked.pop_front()
    }

    /// Pop the next runnable task, dispatching taskloop sources through
    /// their collaborators. A source with unassigned iterations stays at
    /// the head (or is requeued at the tail when `requeue_taskloop` is
    /// set); an exhausted source is dropped from the queue, its
    /// finalization being driven by the collaborator credits.
    pub(crate) fn pop_ready(&mut self, cpu: &Cpu, requeue_taskloop: bool) -> Option<Arc<Task>> {
        while let Some(task) = self.ready.front().cloned() {
            if !task.is_taskloop_source() {
                self.ready.pop_front();
                return Some(task);
            }

            let source = task
                .taskloop
                .as_ref()
                .expect("taskloop source without loop state");
            if !source.has_pending_iterations() {
                self.ready.pop_front();
                continue;
            }

            match taskloop::assign_collaborator(&task, cpu) {
                Some(collaborator) => {
                    if requeue_taskloop {
                        self.ready.pop_front();
                        self.ready.push_back(task);
                    }
                    return Some(collaborator);
                }
                // Raced to exhaustion between the check and the
                // assignment.
                None => {
                    self.ready.pop_front();
                }
            }
        }
        None
    }
}
