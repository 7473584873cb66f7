//! Runtime assembly: CPU set, scheduler, worker pool, and the public
//! task-creation surface.

use crate::config::{Builder, RuntimeConfig};
use crate::context;
use crate::dependencies::registry;
use crate::executors::activation;
use crate::executors::cpu::Cpu;
use crate::executors::cpu_manager::CpuManager;
use crate::executors::thread_manager::ThreadManager;
use crate::executors::worker;
use crate::instrument::Instrument;
use crate::scheduling::{ReadyTaskHint, Scheduler};
use crate::task::taskloop::TaskloopSource;
use crate::task::{finalization, ArgsSlot, IterationBounds, Task, TaskFlags, TaskHandle, TaskInfo};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Process-lifetime state shared by every component.
pub(crate) struct RuntimeInner {
    cfg: RuntimeConfig,
    instrument: Arc<dyn Instrument>,
    cpu_manager: Arc<CpuManager>,
    scheduler: Scheduler,
    thread_manager: ThreadManager,
    shutdown: AtomicBool,

    /// Spawned functions not yet disposed; gates shutdown.
    pending_spawned_functions: AtomicUsize,
    /// Stream executors not yet disposed.
    active_stream_executors: AtomicUsize,
}

impl RuntimeInner {
    pub(crate) fn config(&self) -> &RuntimeConfig {
        &self.cfg
    }

    pub(crate) fn instrument(&self) -> &dyn Instrument {
        &*self.instrument
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub(crate) fn cpu_manager(&self) -> &Arc<CpuManager> {
        &self.cpu_manager
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Queue a runnable task and wake an idle CPU for it.
    pub(crate) fn publish_ready_task(
        &self,
        task: Arc<Task>,
        cpu: Option<&Arc<Cpu>>,
        hint: ReadyTaskHint,
    ) {
        if let Some(idle) = self.scheduler.add_ready_task(task, cpu, hint, true) {
            self.thread_manager.resume_idle(&idle);
        }
    }

    /// Hand a formerly blocked task back to the scheduler.
    pub(crate) fn publish_unblocked(&self, task: Arc<Task>, cpu: Option<&Arc<Cpu>>) {
        self.scheduler.task_gets_unblocked(task, cpu);
        if let Some(idle) = self.scheduler.get_idle_compute_place(false) {
            self.thread_manager.resume_idle(&idle);
        }
    }

    pub(crate) fn spawned_function_created(&self) {
        self.pending_spawned_functions.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn spawned_function_disposed(&self) {
        let previous = self.pending_spawned_functions.fetch_sub(1, Ordering::AcqRel);
        assert!(previous > 0, "spawned-function counter underflow");
    }

    pub(crate) fn stream_executor_created(&self) {
        self.active_stream_executors.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn stream_executor_disposed(&self) {
        let previous = self.active_stream_executors.fetch_sub(1, Ordering::AcqRel);
        assert!(previous > 0, "stream-executor counter underflow");
    }
}

impl std::fmt::Debug for RuntimeInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeInner")
            .field("cfg", &self.cfg)
            .field("scheduler", &self.scheduler.name())
            .finish()
    }
}

/// The task-parallel runtime: one worker per CPU, a dependency registry,
/// and a pluggable scheduler.
#[derive(Debug)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    pub fn builder() -> Builder {
        Builder::new()
    }

    pub(crate) fn start(cfg: RuntimeConfig, instrument: Arc<dyn Instrument>) -> Result<Runtime> {
        crate::api::install_default_symbols();

        let cpu_manager = CpuManager::new(cfg.num_cpus);
        let scheduler = Scheduler::new(cfg.scheduler, cpu_manager.clone(), cfg.requeue_taskloop);

        let inner = Arc::new(RuntimeInner {
            cfg,
            instrument,
            cpu_manager,
            scheduler,
            thread_manager: ThreadManager::new(),
            shutdown: AtomicBool::new(false),
            pending_spawned_functions: AtomicUsize::new(0),
            active_stream_executors: AtomicUsize::new(0),
        });

        inner.thread_manager.spawn_workers(&inner)?;
        tracing::debug!(
            cpus = inner.cfg.num_cpus,
            scheduler = inner.scheduler.name(),
            "runtime started"
        );
        Ok(Runtime { inner })
    }

    pub fn num_cpus(&self) -> usize {
        self.inner.cpu_manager.count()
    }

    pub fn scheduler_name(&self) -> &'static str {
        self.inner.scheduler.name()
    }

    /// Execute `body` as the root task and wait until it and all of its
    /// descendants have finished and been disposed.
    pub fn run<F>(&self, body: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let body = parking_lot::Mutex::new(Some(body));
        let info = TaskInfo::builder(move |_, _| {
            let body = body.lock().take().expect("root body invoked twice");
            body();
        })
        .label("root")
        .build();

        let handle = self.create_task(info, None, TaskFlags::empty());
        let root = handle.task.clone();
        self.submit_task(handle);
        root.completion_gate.wait();
    }

    /// The creation half of the handshake: allocate a task and return the
    /// handle dependency registrations are made on. The parent is the
    /// task currently executing on this thread, if any.
    pub fn create_task(
        &self,
        info: Arc<TaskInfo>,
        args: ArgsSlot,
        flags: TaskFlags,
    ) -> TaskHandle {
        let parent = context::current().map(|frame| frame.task);
        self.create_task_with_parent(info, args, flags, parent.as_ref(), None)
    }

    /// Create a taskloop source over `bounds`.
    pub fn create_taskloop(
        &self,
        info: Arc<TaskInfo>,
        args: ArgsSlot,
        flags: TaskFlags,
        bounds: IterationBounds,
    ) -> TaskHandle {
        let parent = context::current().map(|frame| frame.task);
        self.create_task_with_parent(
            info,
            args,
            flags | TaskFlags::TASKLOOP,
            parent.as_ref(),
            Some(TaskloopSource::new(bounds)),
        )
    }

    fn create_task_with_parent(
        &self,
        info: Arc<TaskInfo>,
        args: ArgsSlot,
        flags: TaskFlags,
        parent: Option<&Arc<Task>>,
        taskloop: Option<TaskloopSource>,
    ) -> TaskHandle {
        let task = Task::new(info.clone(), args, flags, parent, taskloop);
        self.inner.instrument().created_task(
            task.instrumentation_id(),
            info.type_id(),
            info.label(),
        );
        if flags.contains(TaskFlags::SPAWNED) {
            self.inner.spawned_function_created();
        }
        if flags.contains(TaskFlags::STREAM_EXECUTOR) {
            self.inner.stream_executor_created();
        }
        TaskHandle::new(task, self.inner.clone())
    }

    /// The submission half of the handshake: run the depinfo callback,
    /// settle readiness, and publish the task if nothing gates it.
    pub fn submit_task(&self, handle: TaskHandle) {
        let task = handle.task.clone();

        if let Some(register) = task.info().register_depinfo.clone() {
            register(&handle);
        }

        // A taskloop with no iterations never dispatches a collaborator;
        // it finishes right here.
        if task.is_taskloop_source() {
            let source = task.taskloop.as_ref().expect("source without loop state");
            if source.bounds().iterations() == 0 {
                let released = task.mark_as_finished();
                assert!(released);
                registry::unregister_accesses(&self.inner, &task, None);
                finalization::task_finished(&self.inner, &task, None);
                if task.mark_as_released() && task.release_self_disposal() {
                    finalization::dispose_task(&self.inner, &task, None);
                }
                return;
            }
        }

        if task.decrease_predecessors() {
            let cpu = context::current().map(|frame| frame.cpu);
            self.inner
                .publish_ready_task(task, cpu.as_ref(), ReadyTaskHint::Child);
        }
    }

    /// Detached task: no parent, gates shutdown through the pending
    /// spawned-functions counter.
    pub fn spawn_function<F>(&self, body: F, label: impl Into<String>)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let info = TaskInfo::builder(move |_, _| body()).label(label).build();
        let handle = self.create_task_with_parent(info, None, TaskFlags::SPAWNED, None, None);
        self.submit_task(handle);
    }

    /// Fence on the current task's children. Must be called from inside
    /// a task body.
    pub fn taskwait(&self) {
        let frame = context::current().expect("taskwait outside a task body");
        taskwait_impl(&frame.rt, &frame.task, &frame.cpu);
    }

    /// Enable a CPU; wakes its worker. False once shutdown started.
    pub fn enable_cpu(&self, index: usize) -> bool {
        let cpu = self.inner.cpu_manager.cpu(index).expect("no such CPU");
        activation::enable(&self.inner, cpu)
    }

    /// Disable a CPU; its worker parks after draining local slots. False
    /// once shutdown started.
    pub fn disable_cpu(&self, index: usize) -> bool {
        let cpu = self.inner.cpu_manager.cpu(index).expect("no such CPU");
        activation::disable(&self.inner, cpu)
    }

    pub fn cpu_status(&self, index: usize) -> crate::executors::ActivationStatus {
        self.inner.cpu_manager.cpu(index).expect("no such CPU").status()
    }

    /// Cooperative shutdown: wait for detached work, drive every CPU to
    /// shutdown, join the workers, and drain the queues.
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        while self
            .inner
            .pending_spawned_functions
            .load(Ordering::Acquire)
            > 0
        {
            std::thread::sleep(Duration::from_millis(1));
        }

        for cpu in self.inner.cpu_manager.cpus() {
            activation::shutdown_cpu(&self.inner, cpu);
        }
        for cpu in self.inner.cpu_manager.cpus() {
            cpu.unpark_worker();
        }

        if let Err(error) = self.inner.thread_manager.join_all() {
            panic!("worker join failed at shutdown: {error:?}");
        }

        self.inner.scheduler.drain();
        assert_eq!(
            self.inner.active_stream_executors.load(Ordering::Acquire),
            0,
            "stream executors alive after shutdown"
        );
        tracing::debug!("runtime shut down");
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Taskwait: release the waiting task's own unit, run replacement tasks
/// while children are pending, park when there is nothing to run, and
/// re-arm on exit.
fn taskwait_impl(rt: &Arc<RuntimeInner>, task: &Arc<Task>, cpu: &Arc<Cpu>) {
    registry::handle_taskwait(rt, task, Some(cpu));

    task.mark_blocked_in_taskwait(true);
    if task.finish_child() {
        // No live children.
        task.mark_blocked_in_taskwait(false);
        task.re_arm_self();
        registry::handle_exit_taskwait(rt, task, Some(cpu));
        return;
    }

    loop {
        if task.wait_gate.is_open() {
            break;
        }
        match rt.scheduler().get_ready_task(cpu, Some(task), false) {
            Some(replacement) => {
                if Arc::ptr_eq(&replacement, task) {
                    // Our own unblock publication came back to us.
                    break;
                }
                if replacement.is_blocked_in_taskwait() {
                    replacement.resume_blocked();
                } else {
                    worker::run_task(rt, cpu, &replacement);
                }
            }
            None => {
                // Nothing to run; nap until the last child wakes us. The
                // timeout covers the race where a child became ready
                // after the dequeue attempt.
                task.wait_gate.wait_for(Duration::from_millis(1));
            }
        }
    }

    task.wait_gate.reset();
    task.mark_blocked_in_taskwait(false);
    task.re_arm_self();
    registry::handle_exit_taskwait(rt, task, Some(cpu));
}
