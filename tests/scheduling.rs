//! Scheduler variants: every flavor must drain the same workloads.

use depflow::api::{register_read_depinfo, register_write_depinfo};
use depflow::{IterationBounds, Runtime, SchedulerKind, TaskFlags, TaskHandle, TaskInfo};
use rstest::rstest;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn runtime(cpus: usize, kind: SchedulerKind) -> Arc<Runtime> {
    Arc::new(
        Runtime::builder()
            .num_cpus(cpus)
            .scheduler(kind)
            .try_build()
            .unwrap(),
    )
}

fn submit<D, B>(rt: &Runtime, depinfo: D, body: B)
where
    D: Fn(&TaskHandle) + Send + Sync + 'static,
    B: Fn() + Send + Sync + 'static,
{
    let info = TaskInfo::builder(move |_, _| body())
        .register_depinfo(depinfo)
        .build();
    let handle = rt.create_task(info, None, TaskFlags::empty());
    rt.submit_task(handle);
}

#[rstest]
#[case::naive(SchedulerKind::Naive)]
#[case::fifo(SchedulerKind::Fifo)]
#[case::immediate_successor(SchedulerKind::ImmediateSuccessor)]
#[case::immediate_successor_with_polling(SchedulerKind::ImmediateSuccessorWithPolling)]
fn independent_tasks_all_complete(#[case] kind: SchedulerKind) {
    let rt = runtime(4, kind);
    let counter = Arc::new(AtomicUsize::new(0));

    let runtime = rt.clone();
    let counter_for_run = counter.clone();
    rt.run(move || {
        for _ in 0..200 {
            let counter = counter_for_run.clone();
            let info = TaskInfo::new(move |_, _| {
                counter.fetch_add(1, Ordering::Relaxed);
            });
            let handle = runtime.create_task(info, None, TaskFlags::empty());
            runtime.submit_task(handle);
        }
    });

    assert_eq!(counter.load(Ordering::Relaxed), 200);
}

#[rstest]
#[case::naive(SchedulerKind::Naive)]
#[case::fifo(SchedulerKind::Fifo)]
#[case::immediate_successor(SchedulerKind::ImmediateSuccessor)]
#[case::immediate_successor_with_polling(SchedulerKind::ImmediateSuccessorWithPolling)]
fn dependent_chain_runs_in_order(#[case] kind: SchedulerKind) {
    let rt = runtime(2, kind);
    let value = Arc::new(AtomicUsize::new(0));
    let start = Arc::as_ptr(&value) as usize;
    let len = std::mem::size_of::<usize>();

    let runtime = rt.clone();
    let value_for_run = value.clone();
    rt.run(move || {
        // A chain of 50 read-modify-write steps; any reordering breaks
        // the final count.
        for step in 0..50 {
            let value = value_for_run.clone();
            submit(
                &runtime,
                move |handle| register_write_depinfo(handle, start, len),
                move || {
                    let seen = value.load(Ordering::Relaxed);
                    assert_eq!(seen, step, "chain step ran out of order");
                    value.store(seen + 1, Ordering::Relaxed);
                },
            );
        }
        let value = value_for_run.clone();
        submit(
            &runtime,
            move |handle| register_read_depinfo(handle, start, len),
            move || assert_eq!(value.load(Ordering::Relaxed), 50),
        );
    });

    assert_eq!(value.load(Ordering::Relaxed), 50);
}

#[rstest]
#[case::head(false)]
#[case::requeue(true)]
fn taskloop_collaborators_cover_every_iteration(#[case] requeue: bool) {
    let rt = Arc::new(
        Runtime::builder()
            .num_cpus(4)
            .scheduler(SchedulerKind::Fifo)
            .requeue_taskloop(requeue)
            .try_build()
            .unwrap(),
    );

    let visited = Arc::new(AtomicUsize::new(0));
    let runtime = rt.clone();
    let visited_for_run = visited.clone();

    rt.run(move || {
        let visited = visited_for_run.clone();
        let info = TaskInfo::new(move |_, bounds| {
            for _ in bounds.lower..bounds.upper {
                visited.fetch_add(1, Ordering::Relaxed);
            }
        });
        let handle = runtime.create_taskloop(
            info,
            None,
            TaskFlags::empty(),
            IterationBounds::new(0, 1000, 64),
        );
        runtime.submit_task(handle);
    });

    assert_eq!(visited.load(Ordering::Relaxed), 1000);
}

#[test]
fn empty_taskloop_finishes_without_dispatch() {
    let rt = runtime(2, SchedulerKind::Fifo);
    let runtime = rt.clone();
    rt.run(move || {
        let info = TaskInfo::new(|_, _| panic!("zero-iteration taskloop must not run"));
        let handle = runtime.create_taskloop(
            info,
            None,
            TaskFlags::empty(),
            IterationBounds::new(10, 10, 4),
        );
        runtime.submit_task(handle);
    });
}

#[test]
fn taskloop_source_orders_against_its_dependencies() {
    let rt = runtime(4, SchedulerKind::Fifo);
    let value = Arc::new(AtomicUsize::new(0));
    let start = Arc::as_ptr(&value) as usize;
    let len = std::mem::size_of::<usize>();

    let runtime = rt.clone();
    let value_for_run = value.clone();
    rt.run(move || {
        let value = value_for_run.clone();
        submit(
            &runtime,
            move |handle| register_write_depinfo(handle, start, len),
            move || value.store(5, Ordering::Relaxed),
        );

        let value = value_for_run.clone();
        let sum = {
            let value = value.clone();
            TaskInfo::builder(move |_, bounds| {
                for _ in bounds.lower..bounds.upper {
                    assert_eq!(value.load(Ordering::Relaxed), 5);
                }
            })
            .register_depinfo(move |handle| register_read_depinfo(handle, start, len))
            .build()
        };
        let handle = runtime.create_taskloop(
            sum,
            None,
            TaskFlags::empty(),
            IterationBounds::new(0, 256, 32),
        );
        runtime.submit_task(handle);
    });
}

#[test]
fn scheduler_selection_comes_from_the_environment() {
    // The builder override wins over the environment; this pins the
    // parsing path only.
    assert_eq!(
        "immediate-successor-with-polling"
            .parse::<SchedulerKind>()
            .unwrap(),
        SchedulerKind::ImmediateSuccessorWithPolling
    );
    assert!("stealing".parse::<SchedulerKind>().is_err());
}
