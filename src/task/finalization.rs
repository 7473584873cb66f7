//! Task finalization: the upward walks that account finished subtrees
//! and dispose task memory in the correct order.

use crate::dependencies::registry;
use crate::executors::cpu::Cpu;
use crate::runtime::RuntimeInner;
use crate::task::taskloop;
use crate::task::{Task, TaskFlags};
use std::sync::Arc;

/// The task's body has returned (or its taskloop source exhausted):
/// propagate "finished" up the parent chain.
///
/// Each step either completes a delayed dependency release (wait clause),
/// wakes an ancestor parked in a taskwait, or ascends one level when the
/// parent's countdown also reaches zero.
pub(crate) fn task_finished(rt: &RuntimeInner, task: &Arc<Task>, cpu: Option<&Arc<Cpu>>) {
    let mut ready = task.finish_child();
    let mut current = Some(task.clone());

    while let Some(task) = current {
        if !ready {
            break;
        }
        let parent = task.parent();

        if task.has_finished() {
            if task.must_delay_release() {
                // Wait clause: every child has now finished, so the
                // delayed release can happen.
                assert!(task.all_children_finished());
                registry::unregister_accesses(rt, &task, cpu);
                task.set_compute_place(None);
                task.complete_delayed_release();

                if task.mark_as_released() && task.release_self_disposal() {
                    dispose_task(rt, &task, cpu);
                }
            }
        } else {
            // An ancestor parked in a taskwait that completes right now.
            rt.publish_unblocked(task.clone(), cpu);
            ready = false;
        }

        if ready {
            if let Some(parent) = &parent {
                ready = parent.finish_child();
            }
        }
        current = parent;
    }
}

/// A task became removable through the late access-holder path (its last
/// pinned access was released by a descendant): dispose it, or wake it if
/// it is parked in a taskwait.
pub(crate) fn dispose_or_unblock(rt: &RuntimeInner, task: &Arc<Task>, cpu: Option<&Arc<Cpu>>) {
    if task.is_blocked_in_taskwait() {
        rt.publish_unblocked(task.clone(), cpu);
        return;
    }
    assert!(
        task.has_finished(),
        "task removable before its body returned"
    );
    if task.release_self_disposal() {
        dispose_task(rt, task, cpu);
    }
}

/// Walk up the ancestor chain disposing every task whose disposal
/// countdown has reached zero.
///
/// Disposal runs the final detach from the dependency registry, credits
/// taskloop collaborators back to their source, invokes the args-block
/// destructor from the task-info descriptor, and releases the parent's
/// unit. Collaborators are preallocated and reused, so they are reset
/// instead of being torn down.
pub(crate) fn dispose_task(rt: &RuntimeInner, task: &Arc<Task>, cpu: Option<&Arc<Cpu>>) {
    let mut current = Some(task.clone());

    while let Some(task) = current {
        assert!(task.has_finished());
        let parent = task.parent();
        let flags = task.flags();

        registry::handle_task_removal(rt, &task, cpu);

        let is_collaborator = task.is_taskloop_collaborator();
        if is_collaborator {
            // May finish the source, which then walks its own
            // finalization path.
            taskloop::credit_collaborator(rt, &task, cpu);
        }

        // The args-block destructor runs for every task, collaborators
        // included.
        if let Some(destructor) = task.info().destroy_args_block.clone() {
            task.with_args(|args| destructor(args));
        }
        let _ = task.take_args();

        if is_collaborator {
            task.reset_for_reuse();
        } else {
            let instrument = rt.instrument();
            instrument.task_is_being_deleted(task.instrumentation_id());
            instrument.destroyed_task(task.instrumentation_id());
            task.mark_disposed_once();
            task.completion_gate.open();

            if flags.contains(TaskFlags::SPAWNED) {
                rt.spawned_function_disposed();
            } else if flags.contains(TaskFlags::STREAM_EXECUTOR) {
                rt.stream_executor_disposed();
            }
        }

        // Ascend while parents become disposable.
        current = match parent {
            Some(parent) => parent.child_unlinked().then_some(parent),
            None => None,
        };
    }
}
