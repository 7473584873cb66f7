//! The CPU activation state machine under churn.

use depflow::{ActivationStatus, Runtime, SchedulerKind, TaskFlags, TaskInfo};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn runtime(cpus: usize, kind: SchedulerKind) -> Arc<Runtime> {
    Arc::new(
        Runtime::builder()
            .num_cpus(cpus)
            .scheduler(kind)
            .try_build()
            .unwrap(),
    )
}

#[test]
fn disable_and_enable_round_trip() {
    let rt = runtime(2, SchedulerKind::Fifo);

    assert_eq!(rt.cpu_status(1), ActivationStatus::Enabled);
    assert!(rt.disable_cpu(1));
    assert!(matches!(
        rt.cpu_status(1),
        ActivationStatus::Disabling | ActivationStatus::Disabled
    ));

    // Disabling twice is a no-op, not an error.
    assert!(rt.disable_cpu(1));

    assert!(rt.enable_cpu(1));
    // The worker completes the transition on its next loop.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while rt.cpu_status(1) != ActivationStatus::Enabled {
        assert!(std::time::Instant::now() < deadline, "enable never settled");
        std::thread::yield_now();
    }
}

#[test]
fn shutdown_is_terminal_for_every_cpu() {
    let rt = runtime(2, SchedulerKind::Fifo);
    rt.shutdown();

    for index in 0..2 {
        assert_eq!(rt.cpu_status(index), ActivationStatus::Shutdown);
    }
    // No transition leaves the shutdown state.
    assert!(!rt.enable_cpu(0));
    assert!(!rt.disable_cpu(0));
    assert_eq!(rt.cpu_status(0), ActivationStatus::Shutdown);
}

#[rstest::rstest]
#[case::fifo(SchedulerKind::Fifo)]
#[case::immediate_successor_with_polling(SchedulerKind::ImmediateSuccessorWithPolling)]
fn s6_tasks_survive_cpu_churn(#[case] kind: SchedulerKind) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let cpus = 4;
    let rt = runtime(cpus, kind);
    let counter = Arc::new(AtomicUsize::new(0));

    // Toggle the upper half of the CPU set while the workload drains.
    let stop = Arc::new(AtomicBool::new(false));
    let toggler = {
        let rt = rt.clone();
        let stop = stop.clone();
        std::thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                for index in cpus / 2..cpus {
                    rt.disable_cpu(index);
                }
                std::thread::sleep(Duration::from_millis(2));
                for index in cpus / 2..cpus {
                    rt.enable_cpu(index);
                }
                std::thread::sleep(Duration::from_millis(2));
            }
        })
    };

    let runtime = rt.clone();
    let counter_for_run = counter.clone();
    rt.run(move || {
        for _ in 0..1000 {
            let counter = counter_for_run.clone();
            let info = TaskInfo::new(move |_, _| {
                counter.fetch_add(1, Ordering::Relaxed);
            });
            let handle = runtime.create_task(info, None, TaskFlags::empty());
            runtime.submit_task(handle);
        }
    });

    stop.store(true, Ordering::Release);
    toggler.join().unwrap();

    assert_eq!(counter.load(Ordering::Relaxed), 1000);

    // Every CPU is in a legal steady state, and shutdown parks nobody.
    for index in 0..cpus {
        assert!(matches!(
            rt.cpu_status(index),
            ActivationStatus::Enabled
                | ActivationStatus::Enabling
                | ActivationStatus::Disabled
                | ActivationStatus::Disabling
        ));
    }

    rt.shutdown();
    for index in 0..cpus {
        assert_eq!(rt.cpu_status(index), ActivationStatus::Shutdown);
    }
}
