//! The CPU activation state machine.
//!
//! All transitions are compare-and-swap with retry; a failed CAS means
//! another actor moved the CPU first and the loop re-reads. Workers drive
//! the second half of each transition from `check_transitions`, which
//! they invoke on every loop iteration.

use crate::executors::cpu::{ActivationStatus, Cpu};
use crate::runtime::RuntimeInner;
use std::sync::Arc;

/// Whether the CPU may receive new work.
pub(crate) fn accepts_work(cpu: &Cpu) -> bool {
    matches!(
        cpu.status(),
        ActivationStatus::Enabled | ActivationStatus::Enabling
    )
}

/// Enable a CPU. Returns whether the CPU is (or will become) enabled;
/// false only when the runtime is shutting down.
pub(crate) fn enable(rt: &RuntimeInner, cpu: &Arc<Cpu>) -> bool {
    loop {
        match cpu.status() {
            ActivationStatus::Uninitialized => {
                unreachable!("enable on an uninitialized CPU")
            }
            ActivationStatus::Enabled | ActivationStatus::Enabling => return true,
            ActivationStatus::Disabled => {
                if cpu.compare_exchange_status(
                    ActivationStatus::Disabled,
                    ActivationStatus::Enabling,
                ) {
                    // Wake a worker so the state change can progress.
                    rt.scheduler().enable_compute_place(cpu);
                    cpu.unpark_worker();
                    return true;
                }
            }
            ActivationStatus::Disabling => {
                if cpu
                    .compare_exchange_status(ActivationStatus::Disabling, ActivationStatus::Enabled)
                {
                    // The worker may have idled in the meantime and lost
                    // its idle-set entry; let it re-register.
                    cpu.unpark_worker();
                    return true;
                }
            }
            ActivationStatus::Shutdown => return false,
        }
    }
}

/// Disable a CPU. Returns false only when the runtime is shutting down.
pub(crate) fn disable(rt: &RuntimeInner, cpu: &Arc<Cpu>) -> bool {
    loop {
        match cpu.status() {
            ActivationStatus::Uninitialized => {
                unreachable!("disable on an uninitialized CPU")
            }
            ActivationStatus::Enabled => {
                if cpu
                    .compare_exchange_status(ActivationStatus::Enabled, ActivationStatus::Disabling)
                {
                    rt.scheduler().disable_compute_place(cpu);
                    // Wake the worker so it completes the transition and
                    // parks as disabled.
                    cpu.unpark_worker();
                    return true;
                }
            }
            ActivationStatus::Enabling => {
                if cpu
                    .compare_exchange_status(ActivationStatus::Enabling, ActivationStatus::Disabled)
                {
                    rt.scheduler().disable_compute_place(cpu);
                    return true;
                }
            }
            ActivationStatus::Disabled | ActivationStatus::Disabling => return true,
            ActivationStatus::Shutdown => return false,
        }
    }
}

/// Check and handle activation transitions. Must be run regularly by the
/// worker owning `cpu`; may park the calling thread.
pub(crate) fn check_transitions(rt: &RuntimeInner, cpu: &Arc<Cpu>) -> ActivationStatus {
    loop {
        match cpu.status() {
            ActivationStatus::Uninitialized => {
                unreachable!("worker running on an uninitialized CPU")
            }
            ActivationStatus::Enabled => return ActivationStatus::Enabled,
            ActivationStatus::Enabling => {
                if cpu
                    .compare_exchange_status(ActivationStatus::Enabling, ActivationStatus::Enabled)
                {
                    rt.instrument().resumed_compute_place(cpu.index());
                    return ActivationStatus::Enabled;
                }
            }
            ActivationStatus::Disabled => {
                // The CPU stays disabled; the worker parks until an
                // enable or shutdown wakes it.
                rt.instrument().suspending_compute_place(cpu.index());
                cpu.park_worker();
            }
            ActivationStatus::Disabling => {
                if cpu
                    .compare_exchange_status(ActivationStatus::Disabling, ActivationStatus::Disabled)
                {
                    rt.instrument().suspending_compute_place(cpu.index());
                    cpu.park_worker();
                    // Things may have changed while parked: loop again.
                }
            }
            ActivationStatus::Shutdown => return ActivationStatus::Shutdown,
        }
    }
}

/// Notify the CPU that the runtime is shutting down.
pub(crate) fn shutdown_cpu(rt: &RuntimeInner, cpu: &Arc<Cpu>) {
    loop {
        let current = cpu.status();
        match current {
            ActivationStatus::Uninitialized => {
                unreachable!("shutdown of an uninitialized CPU")
            }
            ActivationStatus::Enabled | ActivationStatus::Disabling => {
                if cpu.compare_exchange_status(current, ActivationStatus::Shutdown) {
                    return;
                }
            }
            ActivationStatus::Enabling | ActivationStatus::Disabled => {
                // A parked worker must observe the shutdown.
                if cpu.compare_exchange_status(current, ActivationStatus::Shutdown) {
                    rt.instrument().resumed_compute_place(cpu.index());
                    cpu.unpark_worker();
                    return;
                }
            }
            ActivationStatus::Shutdown => return,
        }
    }
}
