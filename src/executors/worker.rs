//! The worker loop: one per CPU, alternating between activation checks,
//! task execution, and (depending on the scheduler) the polling-slot
//! protocol or plain parking.

use crate::context;
use crate::dependencies::registry;
use crate::executors::activation;
use crate::executors::cpu::{ActivationStatus, Cpu};
use crate::runtime::RuntimeInner;
use crate::scheduling::PollingSlot;
use crate::task::{finalization, taskloop, IterationBounds, Task};
use crate::utils::sys;
use std::sync::Arc;

/// Spins on the polling slot before giving it back and parking.
const POLLING_SPIN_BUDGET: u32 = 4096;

pub(crate) fn worker_loop(rt: Arc<RuntimeInner>, cpu: Arc<Cpu>) {
    cpu.register_worker_thread();
    if rt.config().pin_threads {
        sys::pin_current_thread(cpu.system_id());
    }

    let polling_slot = PollingSlot::new();
    let uses_polling = rt.scheduler().uses_polling_slots();
    tracing::debug!(cpu = cpu.index(), "worker starts");

    loop {
        if activation::check_transitions(&rt, &cpu) == ActivationStatus::Shutdown {
            break;
        }

        if let Some(task) = rt.scheduler().get_ready_task(&cpu, None, true) {
            dispatch(&rt, &cpu, task);
        } else if uses_polling {
            poll_for_task(&rt, &cpu, &polling_slot);
        } else {
            // get_ready_task registered us idle; sleep until a producer
            // or a state transition wakes us.
            cpu.park_worker();
        }
    }

    tracing::debug!(cpu = cpu.index(), "worker exits");
}

/// A task pulled from the scheduler is either a body to run or a parked
/// taskwait thread to resume.
fn dispatch(rt: &Arc<RuntimeInner>, cpu: &Arc<Cpu>, task: Arc<Task>) {
    if task.is_blocked_in_taskwait() {
        task.resume_blocked();
    } else {
        run_task(rt, cpu, &task);
    }
}

/// Execute a task body and walk it through the finalization pipeline.
pub(crate) fn run_task(rt: &Arc<RuntimeInner>, cpu: &Arc<Cpu>, task: &Arc<Task>) {
    task.set_compute_place(Some(cpu.clone()));

    let bounds = if task.is_taskloop_collaborator() {
        taskloop::collaborator_bounds(task)
    } else {
        IterationBounds::EMPTY
    };

    {
        let _frame = context::enter_task(rt, cpu, task);
        task.run_body(&bounds);
    }

    // The placement binding must survive the body.
    debug_assert!(task.compute_place().is_some());
    task.set_compute_place(None);

    let released = task.mark_as_finished();
    if released {
        registry::unregister_accesses(rt, task, Some(cpu));
    }

    finalization::task_finished(rt, task, Some(cpu));

    if released && task.mark_as_released() && task.release_self_disposal() {
        finalization::dispose_task(rt, task, Some(cpu));
    }
}

/// The polling protocol: offer our slot as a direct work target, spin on
/// it, and reclaim it before sleeping so a task can never be stranded.
fn poll_for_task(rt: &Arc<RuntimeInner>, cpu: &Arc<Cpu>, slot: &Arc<PollingSlot>) {
    if !rt.scheduler().request_polling(cpu, slot) {
        // Another worker already polls; we were marked idle.
        cpu.park_worker();
        return;
    }

    let mut spins: u32 = 0;
    loop {
        if let Some(task) = slot.take() {
            dispatch(rt, cpu, task);
            return;
        }

        let stop = !activation::accepts_work(cpu) || rt.is_shutting_down();
        if stop || spins >= POLLING_SPIN_BUDGET {
            if rt.scheduler().release_polling(cpu, slot) {
                // Slot reclaimed; we are idle now. The activation check
                // at the top of the loop handles disabled states.
                if !stop {
                    cpu.park_worker();
                }
                return;
            }
            // A producer claimed the slot: its task is in flight and
            // must be observed before we sleep.
            let task = loop {
                if let Some(task) = slot.take() {
                    break task;
                }
                std::hint::spin_loop();
            };
            dispatch(rt, cpu, task);
            return;
        }

        spins += 1;
        std::hint::spin_loop();
    }
}
