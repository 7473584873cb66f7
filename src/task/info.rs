use bitflags::bitflags;
use std::any::Any;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::task::TaskHandle;

/// The optional argument block carried by a task. Bodies are closures and
/// usually capture their environment instead, but the slot (and its
/// explicit destructor) are part of the creation handshake.
pub type ArgsSlot = Option<Box<dyn Any + Send>>;

/// A task body. Invoked exactly once per dispatch with the task's args
/// slot and its iteration bounds (empty for non-loop tasks). Taskloop
/// collaborators re-invoke the source's body with sub-ranges.
pub type TaskBody = Arc<dyn Fn(&mut ArgsSlot, &IterationBounds) + Send + Sync>;

/// Destructor for the args block, run during disposal before the slot is
/// dropped.
pub type ArgsDestructor = Arc<dyn Fn(&mut ArgsSlot) + Send + Sync>;

/// Dependency-registration callback, invoked between task creation and
/// readiness settlement. This is where the source-lowered code calls the
/// `register_*_depinfo` entry points.
pub type DepinfoCallback = Arc<dyn Fn(&TaskHandle) + Send + Sync>;

/// Iteration range of a taskloop dispatch. Non-loop tasks see `0..0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationBounds {
    pub lower: usize,
    pub upper: usize,
    pub grainsize: usize,
}

impl IterationBounds {
    pub const EMPTY: IterationBounds = IterationBounds {
        lower: 0,
        upper: 0,
        grainsize: 1,
    };

    pub fn new(lower: usize, upper: usize, grainsize: usize) -> Self {
        assert!(grainsize > 0, "taskloop grainsize must be positive");
        Self {
            lower,
            upper,
            grainsize,
        }
    }

    pub fn iterations(&self) -> usize {
        self.upper.saturating_sub(self.lower)
    }
}

bitflags! {
    /// Task-kind flags, fixed at creation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TaskFlags: u16 {
        /// A taskloop source.
        const TASKLOOP = 1 << 0;
        /// A runnable taskloop collaborator (preallocated, reused).
        const RUNNABLE = 1 << 1;
        /// Spawned function; counts toward the runtime's pending total.
        const SPAWNED = 1 << 2;
        /// Stream executor; counts toward the active-executor total.
        const STREAM_EXECUTOR = 1 << 3;
        /// Wait clause: delay dependency release until children finish.
        const WAIT = 1 << 4;
        /// The args block was preallocated by the caller.
        const PREALLOCATED_ARGS = 1 << 5;
    }
}

static NEXT_TASK_TYPE_ID: AtomicU32 = AtomicU32::new(1);

/// The task-info descriptor of the creation handshake: body, optional
/// args-block destructor, optional dependency-registration callback.
/// Each descriptor gets a process-wide type id at construction.
pub struct TaskInfo {
    pub(crate) type_id: u32,
    pub(crate) label: Option<String>,
    pub(crate) body: TaskBody,
    pub(crate) destroy_args_block: Option<ArgsDestructor>,
    pub(crate) register_depinfo: Option<DepinfoCallback>,
}

impl TaskInfo {
    pub fn new<F>(body: F) -> Arc<Self>
    where
        F: Fn(&mut ArgsSlot, &IterationBounds) + Send + Sync + 'static,
    {
        Arc::new(Self {
            type_id: NEXT_TASK_TYPE_ID.fetch_add(1, Ordering::Relaxed),
            label: None,
            body: Arc::new(body),
            destroy_args_block: None,
            register_depinfo: None,
        })
    }

    pub fn builder<F>(body: F) -> TaskInfoBuilder
    where
        F: Fn(&mut ArgsSlot, &IterationBounds) + Send + Sync + 'static,
    {
        TaskInfoBuilder {
            label: None,
            body: Arc::new(body),
            destroy_args_block: None,
            register_depinfo: None,
        }
    }

    pub fn type_id(&self) -> u32 {
        self.type_id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

pub struct TaskInfoBuilder {
    label: Option<String>,
    body: TaskBody,
    destroy_args_block: Option<ArgsDestructor>,
    register_depinfo: Option<DepinfoCallback>,
}

impl TaskInfoBuilder {
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn destroy_args_block<F>(mut self, destructor: F) -> Self
    where
        F: Fn(&mut ArgsSlot) + Send + Sync + 'static,
    {
        self.destroy_args_block = Some(Arc::new(destructor));
        self
    }

    pub fn register_depinfo<F>(mut self, callback: F) -> Self
    where
        F: Fn(&TaskHandle) + Send + Sync + 'static,
    {
        self.register_depinfo = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> Arc<TaskInfo> {
        Arc::new(TaskInfo {
            type_id: NEXT_TASK_TYPE_ID.fetch_add(1, Ordering::Relaxed),
            label: self.label,
            body: self.body,
            destroy_args_block: self.destroy_args_block,
            register_depinfo: self.register_depinfo,
        })
    }
}

impl std::fmt::Debug for TaskInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskInfo")
            .field("type_id", &self.type_id)
            .field("label", &self.label)
            .finish()
    }
}
