//! Task lifecycle: disposal accounting, the wait clause, taskwait, and
//! detached functions.

use depflow::api::{register_read_depinfo, register_write_depinfo};
use depflow::{Runtime, SchedulerKind, TaskFlags, TaskHandle, TaskInfo};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn runtime(cpus: usize) -> Arc<Runtime> {
    Arc::new(
        Runtime::builder()
            .num_cpus(cpus)
            .scheduler(SchedulerKind::ImmediateSuccessor)
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

#[test]
fn every_task_is_disposed_exactly_once_after_its_body() {
    let rt = runtime(4);
    let bodies = Arc::new(AtomicUsize::new(0));
    let destructors = Arc::new(AtomicUsize::new(0));

    let runtime = rt.clone();
    let bodies_for_run = bodies.clone();
    let destructors_for_run = destructors.clone();

    rt.run(move || {
        for i in 0..100usize {
            let bodies = bodies_for_run.clone();
            let destructors = destructors_for_run.clone();
            let bodies_for_check = bodies_for_run.clone();
            let info = TaskInfo::builder(move |args, _| {
                let id = args
                    .as_ref()
                    .and_then(|a| a.downcast_ref::<usize>())
                    .copied()
                    .expect("args block lost");
                assert!(id < 100);
                bodies.fetch_add(1, Ordering::Relaxed);
            })
            .destroy_args_block(move |args| {
                // The destructor sees the args block and runs after the
                // body has returned.
                assert!(args.is_some());
                assert!(bodies_for_check.load(Ordering::Relaxed) > 0);
                destructors.fetch_add(1, Ordering::Relaxed);
            })
            .build();

            let handle = runtime.create_task(info, Some(Box::new(i)), TaskFlags::empty());
            runtime.submit_task(handle);
        }
    });

    assert_eq!(bodies.load(Ordering::Relaxed), 100);
    assert_eq!(destructors.load(Ordering::Relaxed), 100);
}

#[test]
fn children_are_disposed_before_their_parent() {
    let rt = runtime(4);
    let order = Arc::new(parking_lot::Mutex::new(Vec::<&'static str>::new()));

    let runtime = rt.clone();
    let order_for_run = order.clone();

    rt.run(move || {
        let runtime_inner = runtime.clone();
        let parent_order = order_for_run.clone();
        let child_order = order_for_run.clone();

        let parent = TaskInfo::builder(move |_, _| {
            let child_order = child_order.clone();
            let child = TaskInfo::builder(move |_, _| {
                std::thread::sleep(Duration::from_millis(5));
            })
            .destroy_args_block(move |_| child_order.lock().push("child"))
            .build();
            let handle = runtime_inner.create_task(child, Some(Box::new(())), TaskFlags::empty());
            runtime_inner.submit_task(handle);
        })
        .destroy_args_block(move |_| parent_order.lock().push("parent"))
        .build();

        let handle = runtime.create_task(parent, Some(Box::new(())), TaskFlags::empty());
        runtime.submit_task(handle);
    });

    assert_eq!(*order.lock(), vec!["child", "parent"]);
}

#[test]
fn wait_clause_delays_release_until_children_finish() {
    let rt = runtime(4);
    let value = Arc::new(AtomicUsize::new(0));
    let start = Arc::as_ptr(&value) as usize;
    let len = std::mem::size_of::<usize>();
    let flag = Arc::new(AtomicBool::new(false));

    let runtime = rt.clone();
    let runtime_for_parent = rt.clone();
    let flag_for_child = flag.clone();
    let flag_for_reader = flag.clone();

    rt.run(move || {
        // The parent declares the region and exits immediately, but its
        // wait clause holds the release until the child has finished.
        let parent = TaskInfo::builder(move |_, _| {
            let flag = flag_for_child.clone();
            let child = TaskInfo::new(move |_, _| {
                std::thread::sleep(Duration::from_millis(20));
                flag.store(true, Ordering::SeqCst);
            });
            let handle = runtime_for_parent.create_task(child, None, TaskFlags::empty());
            runtime_for_parent.submit_task(handle);
        })
        .register_depinfo(move |handle| register_write_depinfo(handle, start, len))
        .build();
        let handle = runtime.create_task(parent, None, TaskFlags::WAIT);
        runtime.submit_task(handle);

        submit(
            &runtime,
            move |handle| register_read_depinfo(handle, start, len),
            move || {
                assert!(
                    flag_for_reader.load(Ordering::SeqCst),
                    "reader ran before the waited child finished"
                );
            },
        );
    });
}

#[test]
fn taskwait_fences_direct_children() {
    let rt = runtime(4);
    let before = Arc::new(AtomicUsize::new(0));
    let after = Arc::new(AtomicUsize::new(0));

    let runtime = rt.clone();
    let runtime_for_parent = rt.clone();
    let before_for_run = before.clone();
    let after_for_run = after.clone();

    rt.run(move || {
        let runtime_inner = runtime_for_parent.clone();
        let before = before_for_run.clone();
        let after = after_for_run.clone();

        let parent = TaskInfo::new(move |_, _| {
            for _ in 0..8 {
                let before = before.clone();
                let child = TaskInfo::new(move |_, _| {
                    std::thread::sleep(Duration::from_millis(5));
                    before.fetch_add(1, Ordering::SeqCst);
                });
                let handle = runtime_inner.create_task(child, None, TaskFlags::empty());
                runtime_inner.submit_task(handle);
            }

            runtime_inner.taskwait();
            assert_eq!(before.load(Ordering::SeqCst), 8);

            // New children after the fence start from a clean slate.
            for _ in 0..4 {
                let after = after.clone();
                let child = TaskInfo::new(move |_, _| {
                    after.fetch_add(1, Ordering::SeqCst);
                });
                let handle = runtime_inner.create_task(child, None, TaskFlags::empty());
                runtime_inner.submit_task(handle);
            }
        });
        let handle = runtime.create_task(parent, None, TaskFlags::empty());
        runtime.submit_task(handle);
    });

    assert_eq!(before.load(Ordering::SeqCst), 8);
    assert_eq!(after.load(Ordering::SeqCst), 4);
}

#[test]
fn taskwait_with_no_children_returns_immediately() {
    let rt = runtime(2);
    let runtime = rt.clone();
    let ran = Arc::new(AtomicBool::new(false));
    let ran_for_run = ran.clone();

    rt.run(move || {
        let ran = ran_for_run.clone();
        let runtime_inner = runtime.clone();
        let task = TaskInfo::new(move |_, _| {
            runtime_inner.taskwait();
            ran.store(true, Ordering::SeqCst);
        });
        let handle = runtime.create_task(task, None, TaskFlags::empty());
        runtime.submit_task(handle);
    });

    assert!(ran.load(Ordering::SeqCst));
}

#[test]
fn spawned_functions_gate_shutdown() {
    let rt = runtime(2);
    let done = Arc::new(AtomicBool::new(false));

    let done_for_spawn = done.clone();
    rt.spawn_function(
        move || {
            std::thread::sleep(Duration::from_millis(30));
            done_for_spawn.store(true, Ordering::SeqCst);
        },
        "detached",
    );

    rt.shutdown();
    assert!(
        done.load(Ordering::SeqCst),
        "shutdown returned before the spawned function was disposed"
    );
}
