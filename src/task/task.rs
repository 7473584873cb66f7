use crate::dependencies::TaskDataAccesses;
use crate::executors::cpu::Cpu;
use crate::instrument::TaskId;
use crate::runtime::RuntimeInner;
use crate::task::info::{ArgsSlot, IterationBounds, TaskFlags, TaskInfo};
use crate::task::taskloop::{CollaboratorState, TaskloopSource};
use crate::utils::wait_gate::WaitGate;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// A task.
///
/// Lifecycle: created -> registered with the dependency engine ->
/// (possibly) published ready -> executing -> finished -> released ->
/// removable -> disposed. The three countdowns gate the monotonic states:
///
/// - `children_countdown` (init 1): zero means the body has returned and
///   every child subtree has finished.
/// - `access_holders_countdown` (init 1): zero means no dependency link
///   still pins this task's accesses; the task is removable.
/// - `disposal_countdown` (init 1, +1 per child): zero means the task is
///   finished, removable, and all children are disposed; disposal hooks
///   run exactly once at that point.
///
/// `predecessor_countdown` (init 1) gates readiness: unsatisfied accesses
/// add a unit each, submission releases the initial one.
pub(crate) struct Task {
    id: TaskId,
    info: Mutex<Arc<TaskInfo>>,
    args: Mutex<ArgsSlot>,
    flags: TaskFlags,
    parent: Mutex<Weak<Task>>,
    data_accesses: TaskDataAccesses,

    predecessor_countdown: AtomicU32,
    children_countdown: AtomicU32,
    access_holders_countdown: AtomicU32,
    disposal_countdown: AtomicU32,

    body_finished: AtomicBool,
    delay_release_pending: AtomicBool,
    blocked_in_taskwait: AtomicBool,
    disposed: AtomicBool,

    /// Index of the CPU currently executing the task.
    compute_place: Mutex<Option<Arc<Cpu>>>,

    /// Parks the task's thread across a taskwait.
    pub(crate) wait_gate: WaitGate,

    /// Opened once at disposal; awaited by `Runtime::run`.
    pub(crate) completion_gate: WaitGate,

    /// Iteration accounting for taskloop sources.
    pub(crate) taskloop: Option<TaskloopSource>,

    /// Assignment state for preallocated collaborators.
    pub(crate) collaborator: Option<CollaboratorState>,
}

impl Task {
    pub(crate) fn new(
        info: Arc<TaskInfo>,
        args: ArgsSlot,
        flags: TaskFlags,
        parent: Option<&Arc<Task>>,
        taskloop: Option<TaskloopSource>,
    ) -> Arc<Task> {
        let is_collaborator =
            flags.contains(TaskFlags::TASKLOOP) && flags.contains(TaskFlags::RUNNABLE);
        let task = Arc::new(Task {
            id: TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)),
            info: Mutex::new(info),
            args: Mutex::new(args),
            flags,
            parent: Mutex::new(parent.map(Arc::downgrade).unwrap_or_default()),
            data_accesses: TaskDataAccesses::new(),
            predecessor_countdown: AtomicU32::new(1),
            children_countdown: AtomicU32::new(1),
            access_holders_countdown: AtomicU32::new(1),
            disposal_countdown: AtomicU32::new(1),
            body_finished: AtomicBool::new(false),
            delay_release_pending: AtomicBool::new(flags.contains(TaskFlags::WAIT)),
            blocked_in_taskwait: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            compute_place: Mutex::new(None),
            wait_gate: WaitGate::new(),
            completion_gate: WaitGate::new(),
            taskloop,
            collaborator: is_collaborator.then(CollaboratorState::new),
        });
        if let Some(parent) = parent {
            parent.add_child();
        }
        task
    }

    pub(crate) fn instrumentation_id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn info(&self) -> Arc<TaskInfo> {
        self.info.lock().clone()
    }

    pub(crate) fn set_info(&self, info: Arc<TaskInfo>) {
        *self.info.lock() = info;
    }

    pub(crate) fn flags(&self) -> TaskFlags {
        self.flags
    }

    pub(crate) fn parent(&self) -> Option<Arc<Task>> {
        self.parent.lock().upgrade()
    }

    pub(crate) fn set_parent(&self, parent: Option<&Arc<Task>>) {
        *self.parent.lock() = parent.map(Arc::downgrade).unwrap_or_default();
    }

    pub(crate) fn data_accesses(&self) -> &TaskDataAccesses {
        &self.data_accesses
    }

    pub(crate) fn is_taskloop_source(&self) -> bool {
        self.flags.contains(TaskFlags::TASKLOOP) && !self.flags.contains(TaskFlags::RUNNABLE)
    }

    pub(crate) fn is_taskloop_collaborator(&self) -> bool {
        self.flags.contains(TaskFlags::TASKLOOP) && self.flags.contains(TaskFlags::RUNNABLE)
    }

    pub(crate) fn run_body(&self, bounds: &IterationBounds) {
        let info = self.info();
        let mut args = self.args.lock();
        (info.body)(&mut args, bounds);
    }

    // --- readiness -------------------------------------------------------

    pub(crate) fn increase_predecessors(&self, amount: u32) {
        self.predecessor_countdown
            .fetch_add(amount, Ordering::AcqRel);
    }

    /// Returns true when the countdown reaches zero: the task is runnable.
    pub(crate) fn decrease_predecessors(&self) -> bool {
        let previous = self.predecessor_countdown.fetch_sub(1, Ordering::AcqRel);
        assert!(previous > 0, "predecessor countdown underflow");
        previous == 1
    }

    // --- children --------------------------------------------------------

    pub(crate) fn add_child(&self) {
        self.children_countdown.fetch_add(1, Ordering::AcqRel);
        self.disposal_countdown.fetch_add(1, Ordering::AcqRel);
    }

    /// Release one unit of the children countdown (a finished child, or
    /// the task's own unit). True when the countdown reaches zero.
    pub(crate) fn finish_child(&self) -> bool {
        let previous = self.children_countdown.fetch_sub(1, Ordering::AcqRel);
        assert!(previous > 0, "children countdown underflow");
        previous == 1
    }

    pub(crate) fn all_children_finished(&self) -> bool {
        self.children_countdown.load(Ordering::Acquire) == 0
    }

    /// Re-arm the task's own unit after a taskwait.
    pub(crate) fn re_arm_self(&self) {
        self.children_countdown.fetch_add(1, Ordering::AcqRel);
    }

    // --- finishing -------------------------------------------------------

    /// The body returned. Returns whether dependency release may proceed
    /// now; false when a wait clause delays it until the children finish.
    pub(crate) fn mark_as_finished(&self) -> bool {
        let was = self.body_finished.swap(true, Ordering::AcqRel);
        assert!(!was, "task finished twice");
        let release_now = !(self.flags.contains(TaskFlags::WAIT)
            && self.children_countdown.load(Ordering::Acquire) > 1);
        if release_now {
            // An immediate release settles the wait clause, so the
            // finalization walk must not release a second time.
            self.delay_release_pending.store(false, Ordering::Release);
        }
        release_now
    }

    pub(crate) fn has_finished(&self) -> bool {
        self.body_finished.load(Ordering::Acquire)
    }

    pub(crate) fn must_delay_release(&self) -> bool {
        self.delay_release_pending.load(Ordering::Acquire)
    }

    pub(crate) fn complete_delayed_release(&self) {
        self.delay_release_pending.store(false, Ordering::Release);
    }

    // --- removal ---------------------------------------------------------

    pub(crate) fn increase_access_holders(&self) {
        self.access_holders_countdown.fetch_add(1, Ordering::AcqRel);
    }

    /// True when no holder remains: the task is removable.
    pub(crate) fn decrease_access_holders(&self) -> bool {
        let previous = self.access_holders_countdown.fetch_sub(1, Ordering::AcqRel);
        assert!(previous > 0, "access holders countdown underflow");
        previous == 1
    }

    /// Release the base access-holder unit once unregistration has been
    /// initiated. True when the task is removable right away.
    pub(crate) fn mark_as_released(&self) -> bool {
        self.decrease_access_holders()
    }

    /// Fragmentation swaps an access for its per-region clones; each
    /// clone pins the task like the original did.
    pub(crate) fn adopt_access_fragment(&self, access: Arc<crate::dependencies::DataAccess>) {
        self.data_accesses.push_access(access);
        self.increase_access_holders();
    }

    /// Drop a fragmented-away access and its pin. The base unit keeps
    /// the countdown above zero until the task is released.
    pub(crate) fn drop_access(&self, access: &Arc<crate::dependencies::DataAccess>) {
        self.data_accesses.remove_access(access);
        let removable = self.decrease_access_holders();
        debug_assert!(!removable, "fragmentation released the last access holder");
    }

    // --- disposal --------------------------------------------------------

    /// Release the task's own disposal unit (finished + removable).
    /// True when every child is already unlinked and the task may be
    /// disposed.
    pub(crate) fn release_self_disposal(&self) -> bool {
        let previous = self.disposal_countdown.fetch_sub(1, Ordering::AcqRel);
        assert!(previous > 0, "disposal countdown underflow");
        previous == 1
    }

    /// A direct child was disposed. True when the countdown reaches zero.
    pub(crate) fn child_unlinked(&self) -> bool {
        let previous = self.disposal_countdown.fetch_sub(1, Ordering::AcqRel);
        assert!(previous > 0, "disposal countdown underflow");
        previous == 1
    }

    pub(crate) fn mark_disposed_once(&self) {
        let was = self.disposed.swap(true, Ordering::AcqRel);
        assert!(!was, "task disposed twice");
    }

    /// Re-arm a preallocated collaborator for its next assignment.
    pub(crate) fn reset_for_reuse(&self) {
        assert!(self.is_taskloop_collaborator());
        self.body_finished.store(false, Ordering::Release);
        self.children_countdown.store(1, Ordering::Release);
        self.access_holders_countdown.store(1, Ordering::Release);
        self.disposal_countdown.store(1, Ordering::Release);
        self.predecessor_countdown.store(1, Ordering::Release);
        self.blocked_in_taskwait.store(false, Ordering::Release);
        self.wait_gate.reset();
        self.completion_gate.reset();
        self.data_accesses.reset_for_reuse();
        *self.compute_place.lock() = None;
    }

    pub(crate) fn take_args(&self) -> ArgsSlot {
        self.args.lock().take()
    }

    pub(crate) fn with_args(&self, f: impl FnOnce(&mut ArgsSlot)) {
        f(&mut self.args.lock())
    }

    // --- blocking --------------------------------------------------------

    pub(crate) fn mark_blocked_in_taskwait(&self, blocked: bool) {
        self.blocked_in_taskwait.store(blocked, Ordering::Release);
    }

    pub(crate) fn is_blocked_in_taskwait(&self) -> bool {
        self.blocked_in_taskwait.load(Ordering::Acquire)
    }

    /// Resume the thread parked in this task's taskwait.
    pub(crate) fn resume_blocked(&self) {
        self.wait_gate.open();
    }

    // --- placement -------------------------------------------------------

    pub(crate) fn set_compute_place(&self, cpu: Option<Arc<Cpu>>) {
        *self.compute_place.lock() = cpu;
    }

    pub(crate) fn compute_place(&self) -> Option<Arc<Cpu>> {
        self.compute_place.lock().clone()
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id.0)
            .field("flags", &self.flags)
            .field("finished", &self.has_finished())
            .finish()
    }
}

/// Public handle returned by the creation handshake. Dependency
/// registration calls are made against it before submission.
#[derive(Clone)]
pub struct TaskHandle {
    pub(crate) task: Arc<Task>,
    pub(crate) rt: Arc<RuntimeInner>,
}

impl TaskHandle {
    pub(crate) fn new(task: Arc<Task>, rt: Arc<RuntimeInner>) -> Self {
        Self { task, rt }
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TaskHandle").field(&self.task.id.0).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Task: Send, Sync);
    assert_impl_all!(TaskHandle: Send, Sync);

    fn plain_task() -> Arc<Task> {
        Task::new(
            TaskInfo::new(|_, _| {}),
            None,
            TaskFlags::empty(),
            None,
            None,
        )
    }

    #[test]
    fn predecessor_countdown_reaches_zero_once() {
        let task = plain_task();
        task.increase_predecessors(2);
        assert!(!task.decrease_predecessors());
        assert!(!task.decrease_predecessors());
        assert!(task.decrease_predecessors());
    }

    #[test]
    fn children_countdown_includes_self_unit() {
        let parent = plain_task();
        let _child = Task::new(
            TaskInfo::new(|_, _| {}),
            None,
            TaskFlags::empty(),
            Some(&parent),
            None,
        );
        // Parent's own unit plus one child.
        assert!(!parent.finish_child());
        assert!(parent.finish_child());
    }

    #[test]
    #[should_panic(expected = "task finished twice")]
    fn double_finish_asserts() {
        let task = plain_task();
        task.mark_as_finished();
        task.mark_as_finished();
    }

    #[test]
    fn wait_clause_delays_release_while_children_live() {
        let parent = Task::new(
            TaskInfo::new(|_, _| {}),
            None,
            TaskFlags::WAIT,
            None,
            None,
        );
        let _child = Task::new(
            TaskInfo::new(|_, _| {}),
            None,
            TaskFlags::empty(),
            Some(&parent),
            None,
        );
        assert!(!parent.mark_as_finished());
        assert!(parent.must_delay_release());
    }
}
