//! Ready-queue management and dispatch.
//!
//! Four scheduler variants share one contract; they differ in queue
//! discipline and in the extra lock-free fast paths they layer on top
//! (the per-CPU immediate-successor slot and the polling slot). The
//! variant is chosen at build time, by the builder or the
//! `DEPFLOW_SCHEDULER` environment variable.

mod fifo;
mod immediate_successor;
mod immediate_successor_polling;
mod naive;
mod queues;
mod slot;

pub(crate) use queues::SchedulerQueues;
pub(crate) use slot::{AtomicTaskSlot, PollingSlot, PublishedPollingSlot};

use crate::executors::cpu::Cpu;
use crate::executors::cpu_manager::CpuManager;
use crate::task::Task;
use anyhow::{anyhow, Error};
use std::str::FromStr;
use std::sync::Arc;

use fifo::FifoScheduler;
use immediate_successor::ImmediateSuccessorScheduler;
use immediate_successor_polling::ImmediateSuccessorWithPollingScheduler;
use naive::NaiveScheduler;

/// Where a ready task comes from. Everything but a just-born child is
/// eligible for the immediate-successor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyTaskHint {
    /// Just created and submitted.
    Child,
    /// Was blocked (taskwait) and is runnable again.
    Unblocked,
    /// No placement information (e.g. released by dependency
    /// satisfaction).
    NoHint,
}

/// The scheduler variant selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerKind {
    Naive,
    Fifo,
    ImmediateSuccessor,
    ImmediateSuccessorWithPolling,
}

impl SchedulerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerKind::Naive => "naive",
            SchedulerKind::Fifo => "fifo",
            SchedulerKind::ImmediateSuccessor => "immediate-successor",
            SchedulerKind::ImmediateSuccessorWithPolling => "immediate-successor-with-polling",
        }
    }
}

impl FromStr for SchedulerKind {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "naive" => Ok(SchedulerKind::Naive),
            "fifo" => Ok(SchedulerKind::Fifo),
            "immediate-successor" => Ok(SchedulerKind::ImmediateSuccessor),
            "immediate-successor-with-polling" => Ok(SchedulerKind::ImmediateSuccessorWithPolling),
            other => Err(anyhow!("unknown scheduler '{other}'")),
        }
    }
}

impl std::fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The contract every variant implements.
pub(crate) trait SchedulerPolicy: Send + Sync {
    /// Queue a ready task. Returns an idle compute place the caller
    /// should wake, when `do_get_idle` is set and one is available.
    fn add_ready_task(
        &self,
        task: Arc<Task>,
        cpu: Option<&Arc<Cpu>>,
        hint: ReadyTaskHint,
        do_get_idle: bool,
    ) -> Option<Arc<Cpu>>;

    /// A blocked task is runnable again.
    fn task_gets_unblocked(&self, task: Arc<Task>, cpu: Option<&Arc<Cpu>>);

    /// Pick the next task for `cpu`. Absence is a legal result; with
    /// `can_mark_idle` the CPU is registered idle before returning None.
    fn get_ready_task(
        &self,
        cpu: &Arc<Cpu>,
        current_task: Option<&Arc<Task>>,
        can_mark_idle: bool,
    ) -> Option<Arc<Task>>;

    fn get_idle_compute_place(&self, force: bool) -> Option<Arc<Cpu>>;

    /// A worker about to idle offers its polling slot. The default
    /// implementation (non-polling variants) just attempts a direct
    /// dequeue into the slot.
    fn request_polling(&self, cpu: &Arc<Cpu>, slot: &Arc<PollingSlot>) -> bool {
        assert!(slot.is_empty());
        match self.get_ready_task(cpu, None, false) {
            Some(task) => {
                slot.deposit(task);
                true
            }
            None => false,
        }
    }

    /// Reclaim a previously offered polling slot. Only meaningful for
    /// variants that actually publish slots.
    fn release_polling(&self, _cpu: &Arc<Cpu>, _slot: &Arc<PollingSlot>) -> bool {
        unreachable!("release_polling on a scheduler that never parks slots")
    }

    /// Whether workers should drive the polling-slot protocol while idle.
    fn uses_polling_slots(&self) -> bool {
        false
    }

    fn disable_compute_place(&self, _cpu: &Arc<Cpu>) {}

    fn enable_compute_place(&self, _cpu: &Arc<Cpu>) {}

    /// Drop all queued work. Called at shutdown after workers drained.
    fn drain(&self);

    fn name(&self) -> &'static str;
}

/// Tagged dispatch over the four variants.
#[derive(Debug)]
pub(crate) enum Scheduler {
    Naive(NaiveScheduler),
    Fifo(FifoScheduler),
    ImmediateSuccessor(ImmediateSuccessorScheduler),
    ImmediateSuccessorWithPolling(ImmediateSuccessorWithPollingScheduler),
}

impl Scheduler {
    pub(crate) fn new(kind: SchedulerKind, cpus: Arc<CpuManager>, requeue_taskloop: bool) -> Self {
        match kind {
            SchedulerKind::Naive => Scheduler::Naive(NaiveScheduler::new(cpus)),
            SchedulerKind::Fifo => Scheduler::Fifo(FifoScheduler::new(cpus, requeue_taskloop)),
            SchedulerKind::ImmediateSuccessor => {
                Scheduler::ImmediateSuccessor(ImmediateSuccessorScheduler::new(cpus))
            }
            SchedulerKind::ImmediateSuccessorWithPolling => Scheduler::ImmediateSuccessorWithPolling(
                ImmediateSuccessorWithPollingScheduler::new(cpus),
            ),
        }
    }

    pub(crate) fn policy(&self) -> &dyn SchedulerPolicy {
        match self {
            Scheduler::Naive(s) => s,
            Scheduler::Fifo(s) => s,
            Scheduler::ImmediateSuccessor(s) => s,
            Scheduler::ImmediateSuccessorWithPolling(s) => s,
        }
    }
}

impl std::ops::Deref for Scheduler {
    type Target = dyn SchedulerPolicy;

    fn deref(&self) -> &Self::Target {
        match self {
            Scheduler::Naive(s) => s,
            Scheduler::Fifo(s) => s,
            Scheduler::ImmediateSuccessor(s) => s,
            Scheduler::ImmediateSuccessorWithPolling(s) => s,
        }
    }
}
