//! Access registration and satisfaction propagation.
//!
//! The entry points mirror the lifecycle of a task: `register_access`
//! while the task is being submitted, `unregister_accesses` when its body
//! returns (possibly delayed by a wait clause), the taskwait pair while
//! the task fences on its children, and `handle_task_removal` as the
//! final detach before disposal.
//!
//! Effects that cross a sequence boundary never run under the current
//! sequence's lock; they are queued on a [`PropagationBatch`] and applied
//! one lock at a time.

use crate::dependencies::access::{AccessType, DataAccess};
use crate::dependencies::region::Region;
use crate::dependencies::sequence::AddAccess;
use crate::executors::cpu::Cpu;
use crate::instrument::TaskId;
use crate::runtime::RuntimeInner;
use crate::scheduling::ReadyTaskHint;
use crate::task::{finalization, Task};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::sync::Arc;

/// Deferred cross-sequence effects collected while a sequence lock is
/// held. One batch lives per propagation call, on the caller's stack.
#[derive(Default)]
pub(crate) struct PropagationBatch {
    pub(crate) ready_tasks: SmallVec<[Arc<Task>; 4]>,
    pub(crate) actions: VecDeque<DepAction>,
}

pub(crate) enum DepAction {
    /// The access's completion countdown reached zero: detach it from its
    /// chain and propagate satisfaction to the survivors.
    CompleteAccess(Arc<DataAccess>),
    /// The access became globally satisfied: the chains nested under it
    /// may open their gates.
    AccessSatisfied(Arc<DataAccess>),
    /// A nested sequence drained for good; its supers lose one unit.
    SequenceDrained {
        supers: SmallVec<[Arc<DataAccess>; 1]>,
    },
}

/// Record an access of `task` over `region` in the parent's domain.
/// Returns whether the access is already satisfied. Idempotent for
/// repeated identical accesses; re-declarations upgrade per the merge
/// table and may revoke satisfaction.
pub(crate) fn register_access(
    rt: &RuntimeInner,
    task: &Arc<Task>,
    access_type: AccessType,
    weak: bool,
    region: Region,
) -> bool {
    let Some(parent) = task.parent() else {
        // A task with no parent has nothing above it to order against.
        return true;
    };

    let instrument = rt.instrument();
    let mut all_satisfied = true;

    let parent_table = parent.data_accesses();
    let mut domain = parent_table.lock();
    let sequences = domain.decompose(region, instrument, task.instrumentation_id());

    for sequence in sequences {
        match sequence.add_access(task, access_type, weak, instrument) {
            AddAccess::Linked { access, satisfied } => {
                task.data_accesses().push_access(access);
                task.increase_access_holders();
                if !weak && !satisfied {
                    task.increase_predecessors(1);
                }
                all_satisfied &= satisfied;
            }
            AddAccess::Merged {
                access,
                newly_gating,
            } => {
                if newly_gating {
                    task.increase_predecessors(1);
                }
                all_satisfied &= access.globally_satisfied();
            }
        }
    }
    drop(domain);

    all_satisfied
}

/// The task's body has returned (and, with a wait clause, its children
/// have finished): release its accesses and propagate satisfaction to
/// every successor.
pub(crate) fn unregister_accesses(rt: &RuntimeInner, task: &Arc<Task>, cpu: Option<&Arc<Cpu>>) {
    let triggerer = task.instrumentation_id();
    let mut batch = PropagationBatch::default();

    // The finish markings serialize with sibling registrations (and
    // their fragmentation) through the parent's domain lock.
    let parent = task.parent();
    let domain_guard = parent.as_ref().map(|p| p.data_accesses().lock());

    for access in task.data_accesses().snapshot_accesses() {
        access.mark_originator_finished();

        // Nested sequences that drained while the task was still running
        // could not report; they can now.
        for subsequence in access.subsequences() {
            subsequence.report_drain(false, &mut batch);
        }

        if access.decrease_completion_countdown() {
            batch.actions.push_back(DepAction::CompleteAccess(access));
        }
    }

    drop(domain_guard);
    process_batch(rt, batch, triggerer, cpu);
}

/// The task fences on its children. The wait itself is driven by the
/// lifecycle counters; the registry only needs to act on exit.
pub(crate) fn handle_taskwait(_rt: &RuntimeInner, task: &Arc<Task>, _cpu: Option<&Arc<Cpu>>) {
    tracing::trace!(task = task.instrumentation_id().0, "taskwait enter");
}

/// The taskwait completed: every child chain has drained. Report the
/// drains and clear the bottom map so subsequent accesses see a clean
/// sequence.
pub(crate) fn handle_exit_taskwait(rt: &RuntimeInner, task: &Arc<Task>, cpu: Option<&Arc<Cpu>>) {
    let mut batch = PropagationBatch::default();

    for sequence in task.data_accesses().drain_bottom_map() {
        debug_assert!(
            sequence.is_empty(),
            "taskwait exited with a live child access"
        );
        sequence.report_drain(true, &mut batch);
    }

    process_batch(rt, batch, task.instrumentation_id(), cpu);
}

/// Final detach from the registry, on the disposal path.
pub(crate) fn handle_task_removal(rt: &RuntimeInner, task: &Arc<Task>, cpu: Option<&Arc<Cpu>>) {
    let mut batch = PropagationBatch::default();
    for sequence in task.data_accesses().drain_bottom_map() {
        sequence.report_drain(true, &mut batch);
    }
    process_batch(rt, batch, task.instrumentation_id(), cpu);

    task.data_accesses().mark_deleted();
}

/// Apply a batch to quiescence, taking one lock at a time, then publish
/// the tasks that became runnable.
fn process_batch(
    rt: &RuntimeInner,
    mut batch: PropagationBatch,
    triggerer: TaskId,
    cpu: Option<&Arc<Cpu>>,
) {
    let instrument = rt.instrument();

    while let Some(action) = batch.actions.pop_front() {
        match action {
            DepAction::CompleteAccess(access) => {
                match access.sequence() {
                    Some(sequence) => {
                        sequence.complete_and_remove(&access, instrument, triggerer, &mut batch);
                    }
                    None => access.mark_complete(),
                }
                if let Some(originator) = access.originator.upgrade() {
                    originator.data_accesses().remove_access(&access);
                    if originator.decrease_access_holders() {
                        finalization::dispose_or_unblock(rt, &originator, cpu);
                    }
                }
            }
            DepAction::AccessSatisfied(access) => {
                for subsequence in access.subsequences() {
                    subsequence.reevaluate(instrument, triggerer, &mut batch);
                }
            }
            DepAction::SequenceDrained { supers } => {
                for super_access in supers {
                    if super_access.decrease_completion_countdown() {
                        batch
                            .actions
                            .push_back(DepAction::CompleteAccess(super_access));
                    }
                }
            }
        }
    }

    for ready in batch.ready_tasks.drain(..) {
        rt.publish_ready_task(ready, cpu, ReadyTaskHint::NoHint);
    }
}
