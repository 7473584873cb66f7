#![allow(unused)]

/// Bind the calling thread to one CPU. Workers call this at startup when
/// pinning is enabled so that each worker owns its compute place.
#[cfg(target_os = "linux")]
pub(crate) fn pin_current_thread(cpu_id: usize) -> bool {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(cpu_id, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) == 0
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn pin_current_thread(_cpu_id: usize) -> bool {
    false
}

/// Number of CPUs the process may run on.
pub(crate) fn available_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
