use crate::executors::cpu::Cpu;
use crate::executors::worker;
use crate::runtime::RuntimeInner;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Spawns, wakes, and joins the worker threads, one per CPU.
#[derive(Debug, Default)]
pub(crate) struct ThreadManager {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadManager {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn spawn_workers(&self, rt: &Arc<RuntimeInner>) -> Result<()> {
        let mut handles = self.handles.lock();
        assert!(handles.is_empty(), "workers already spawned");

        for cpu in rt.cpu_manager().cpus() {
            let rt = rt.clone();
            let cpu = cpu.clone();
            let handle = std::thread::Builder::new()
                .name(format!("depflow-worker-{}", cpu.index()))
                .spawn(move || worker::worker_loop(rt, cpu))
                .context("failed to spawn worker thread")?;
            handles.push(handle);
        }
        Ok(())
    }

    /// Resume the idle worker bound to `cpu`.
    pub(crate) fn resume_idle(&self, cpu: &Arc<Cpu>) {
        cpu.unpark_worker();
    }

    pub(crate) fn join_all(&self) -> Result<()> {
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            handle
                .join()
                .map_err(|_| anyhow::anyhow!("worker thread panicked"))?;
        }
        Ok(())
    }
}
