use crate::executors::cpu::{ActivationStatus, Cpu};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Owns the CPU set and the idle bookkeeping. Waking the idle workers is
/// the thread manager's job; this type only decides which CPU to wake.
#[derive(Debug)]
pub(crate) struct CpuManager {
    cpus: Vec<Arc<Cpu>>,
    idle: Mutex<VecDeque<usize>>,
}

impl CpuManager {
    pub(crate) fn new(count: usize) -> Arc<Self> {
        assert!(count > 0, "a runtime needs at least one CPU");
        Arc::new(Self {
            cpus: (0..count).map(|i| Cpu::new(i, i)).collect(),
            idle: Mutex::new(VecDeque::with_capacity(count)),
        })
    }

    pub(crate) fn cpus(&self) -> &[Arc<Cpu>] {
        &self.cpus
    }

    pub(crate) fn cpu(&self, index: usize) -> Option<&Arc<Cpu>> {
        self.cpus.get(index)
    }

    pub(crate) fn count(&self) -> usize {
        self.cpus.len()
    }

    /// Register a CPU as idle. Duplicate registrations are absorbed by
    /// the per-CPU flag.
    pub(crate) fn cpu_becomes_idle(&self, cpu: &Arc<Cpu>) {
        if !cpu.idle.swap(true, Ordering::AcqRel) {
            self.idle.lock().push_back(cpu.index());
        }
    }

    /// Take one idle CPU that still accepts work. Disabled CPUs drop out
    /// of the set here; their workers re-register when re-enabled.
    pub(crate) fn get_idle_cpu(&self) -> Option<Arc<Cpu>> {
        let mut idle = self.idle.lock();
        while let Some(index) = idle.pop_front() {
            let cpu = self.cpus[index].clone();
            cpu.idle.store(false, Ordering::Release);
            if matches!(
                cpu.status(),
                ActivationStatus::Enabled | ActivationStatus::Enabling
            ) {
                return Some(cpu);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_set_is_duplicate_free() {
        let manager = CpuManager::new(2);
        let cpu = manager.cpu(0).unwrap().clone();

        manager.cpu_becomes_idle(&cpu);
        manager.cpu_becomes_idle(&cpu);

        assert_eq!(manager.get_idle_cpu().unwrap().index(), 0);
        assert!(manager.get_idle_cpu().is_none());
    }
}
