//! Thread-local execution context.
//!
//! Workers push the task they are executing here; task creation and
//! taskwait resolve their "current task" and "current CPU" through it.
//! The context is a stack because a taskwait runs replacement tasks
//! inline on the waiting worker.

use crate::executors::cpu::Cpu;
use crate::runtime::RuntimeInner;
use crate::task::Task;
use std::cell::RefCell;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct ExecutionFrame {
    pub(crate) task: Arc<Task>,
    pub(crate) cpu: Arc<Cpu>,
    pub(crate) rt: Arc<RuntimeInner>,
}

thread_local! {
    static FRAMES: RefCell<Vec<ExecutionFrame>> = const { RefCell::new(Vec::new()) };
}

pub(crate) struct FrameGuard;

impl Drop for FrameGuard {
    fn drop(&mut self) {
        FRAMES.with(|frames| {
            frames
                .borrow_mut()
                .pop()
                .expect("execution frame stack underflow");
        });
    }
}

pub(crate) fn enter_task(rt: &Arc<RuntimeInner>, cpu: &Arc<Cpu>, task: &Arc<Task>) -> FrameGuard {
    FRAMES.with(|frames| {
        frames.borrow_mut().push(ExecutionFrame {
            task: task.clone(),
            cpu: cpu.clone(),
            rt: rt.clone(),
        });
    });
    FrameGuard
}

pub(crate) fn current() -> Option<ExecutionFrame> {
    FRAMES.with(|frames| frames.borrow().last().cloned())
}
