//! Taskloop iteration accounting and collaborator dispatch.
//!
//! A taskloop source never runs its own body. It sits at the head of the
//! ready queue while it has unassigned iteration ranges; workers asking
//! for a task receive a *collaborator*, a preallocated runnable task that
//! covers one chunk. Collaborators are reused for the whole process
//! lifetime: disposal credits their completed iterations back to the
//! source and resets them instead of freeing them. The last credit drives
//! the source into the finished state and through the normal
//! finalization path.

use crate::executors::cpu::Cpu;
use crate::runtime::RuntimeInner;
use crate::task::info::{IterationBounds, TaskFlags, TaskInfo};
use crate::task::{finalization, Task};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Iteration state carried by a taskloop source.
#[derive(Debug)]
pub(crate) struct TaskloopSource {
    bounds: IterationBounds,
    next_lower: Mutex<usize>,
    remaining_iterations: AtomicUsize,
}

impl TaskloopSource {
    pub(crate) fn new(bounds: IterationBounds) -> Self {
        Self {
            next_lower: Mutex::new(bounds.lower),
            remaining_iterations: AtomicUsize::new(bounds.iterations()),
            bounds,
        }
    }

    pub(crate) fn bounds(&self) -> IterationBounds {
        self.bounds
    }

    /// Whether unassigned iterations remain.
    pub(crate) fn has_pending_iterations(&self) -> bool {
        *self.next_lower.lock() < self.bounds.upper
    }

    /// Carve the next chunk off the unassigned range.
    pub(crate) fn assign_chunk(&self) -> Option<IterationBounds> {
        let mut next = self.next_lower.lock();
        if *next >= self.bounds.upper {
            return None;
        }
        let lower = *next;
        let upper = (lower + self.bounds.grainsize).min(self.bounds.upper);
        *next = upper;
        Some(IterationBounds::new(lower, upper, self.bounds.grainsize))
    }

    /// Credit completed iterations. True when the source is exhausted.
    pub(crate) fn decrement_remaining(&self, completed: usize) -> bool {
        let previous = self
            .remaining_iterations
            .fetch_sub(completed, Ordering::AcqRel);
        assert!(previous >= completed, "taskloop iteration over-credit");
        previous == completed
    }
}

/// Assignment state of a preallocated collaborator.
#[derive(Debug, Default)]
pub(crate) struct CollaboratorState {
    assignment: Mutex<Option<Assignment>>,
}

#[derive(Debug)]
struct Assignment {
    source: Arc<Task>,
    chunk: IterationBounds,
}

impl CollaboratorState {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

/// Build the per-CPU collaborator. It starts with a placeholder body; the
/// real body comes from the source at assignment time.
pub(crate) fn preallocate_collaborator() -> Arc<Task> {
    Task::new(
        TaskInfo::new(|_, _| unreachable!("collaborator dispatched without an assignment")),
        None,
        TaskFlags::TASKLOOP | TaskFlags::RUNNABLE | TaskFlags::PREALLOCATED_ARGS,
        None,
        None,
    )
}

/// Bind a collaborator to `source` for one chunk. Returns `None` when
/// the source has no unassigned iterations left.
///
/// The CPU's preallocated collaborator is preferred; when its previous
/// run has not been credited yet (disposal deferred by pending
/// children), a fresh one-shot collaborator stands in.
pub(crate) fn assign_collaborator(source: &Arc<Task>, cpu: &Cpu) -> Option<Arc<Task>> {
    let loop_state = source
        .taskloop
        .as_ref()
        .expect("collaborator requested from a non-taskloop task");
    let chunk = loop_state.assign_chunk()?;

    let mut collaborator = cpu.collaborator();
    if !collaborator_is_free(&collaborator) {
        collaborator = preallocate_collaborator();
    }
    let state = collaborator
        .collaborator
        .as_ref()
        .expect("collaborator lacks assignment state");

    {
        let mut assignment = state.assignment.lock();
        assert!(
            assignment.is_none(),
            "collaborator reassigned while in flight"
        );
        *assignment = Some(Assignment {
            source: source.clone(),
            chunk,
        });
    }

    collaborator.set_info(source.info());
    collaborator.set_parent(Some(source));
    source.add_child();

    Some(collaborator)
}

/// A collaborator is reusable once its previous assignment was credited.
/// The flag can only flip towards free concurrently, so a stale read at
/// worst allocates a spare collaborator.
fn collaborator_is_free(collaborator: &Arc<Task>) -> bool {
    collaborator
        .collaborator
        .as_ref()
        .map(|state| state.assignment.lock().is_none())
        .unwrap_or(false)
}

/// The bounds a collaborator should run with.
pub(crate) fn collaborator_bounds(task: &Task) -> IterationBounds {
    task.collaborator
        .as_ref()
        .and_then(|state| state.assignment.lock().as_ref().map(|a| a.chunk))
        .expect("collaborator executed without an assignment")
}

/// Disposal-time credit: report the collaborator's completed iterations
/// to its source, reset the collaborator for reuse, and finish the source
/// if this was the last outstanding chunk.
pub(crate) fn credit_collaborator(
    rt: &RuntimeInner,
    collaborator: &Arc<Task>,
    cpu: Option<&Arc<Cpu>>,
) {
    let state = collaborator
        .collaborator
        .as_ref()
        .expect("crediting a task that is not a collaborator");

    let Some(assignment) = state.assignment.lock().take() else {
        return;
    };
    let completed = assignment.chunk.iterations();
    let source = assignment.source;

    collaborator.set_parent(None);

    if completed > 0 {
        let loop_state = source
            .taskloop
            .as_ref()
            .expect("collaborator credited a non-taskloop source");
        if loop_state.decrement_remaining(completed) {
            // Last chunk: the source finishes now and releases its
            // accesses like any other task.
            let released = source.mark_as_finished();
            assert!(released, "taskloop sources do not carry wait clauses");
            crate::dependencies::registry::unregister_accesses(rt, &source, cpu);
            finalization::task_finished(rt, &source, cpu);
            if source.mark_as_released() && source.release_self_disposal() {
                finalization::dispose_task(rt, &source, cpu);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_cover_the_range_exactly() {
        let source = TaskloopSource::new(IterationBounds::new(0, 10, 4));
        let chunks: Vec<_> = std::iter::from_fn(|| source.assign_chunk()).collect();
        assert_eq!(
            chunks
                .iter()
                .map(|c| (c.lower, c.upper))
                .collect::<Vec<_>>(),
            vec![(0, 4), (4, 8), (8, 10)]
        );
        assert!(!source.has_pending_iterations());
    }

    #[test]
    fn last_credit_exhausts_the_source() {
        let source = TaskloopSource::new(IterationBounds::new(0, 6, 3));
        let a = source.assign_chunk().unwrap();
        let b = source.assign_chunk().unwrap();
        assert!(!source.decrement_remaining(a.iterations()));
        assert!(source.decrement_remaining(b.iterations()));
    }
}
