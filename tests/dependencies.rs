//! End-to-end ordering semantics of the dependency engine.

use depflow::api::{
    register_concurrent_depinfo, register_read_depinfo, register_weak_write_depinfo,
    register_write_depinfo,
};
use depflow::{Runtime, SchedulerKind, TaskFlags, TaskHandle, TaskInfo};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn runtime(cpus: usize) -> Arc<Runtime> {
    Arc::new(
        Runtime::builder()
            .num_cpus(cpus)
            .scheduler(SchedulerKind::Fifo)
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

fn region_of(target: &Arc<AtomicUsize>) -> (usize, usize) {
    (Arc::as_ptr(target) as usize, std::mem::size_of::<usize>())
}

#[test]
fn s1_read_waits_for_the_write() {
    let rt = runtime(4);
    let value = Arc::new(AtomicUsize::new(0));
    let (start, len) = region_of(&value);

    let runtime = rt.clone();
    let observed = Arc::new(AtomicUsize::new(0));
    let observed_in_reader = observed.clone();
    let writer_value = value.clone();
    let reader_value = value.clone();

    rt.run(move || {
        submit(
            &runtime,
            move |handle| register_write_depinfo(handle, start, len),
            move || {
                // Give the reader every chance to jump the gun.
                std::thread::sleep(Duration::from_millis(20));
                writer_value.store(42, Ordering::Relaxed);
            },
        );
        submit(
            &runtime,
            move |handle| register_read_depinfo(handle, start, len),
            move || {
                observed_in_reader.store(reader_value.load(Ordering::Relaxed), Ordering::Relaxed);
            },
        );
    });

    assert_eq!(observed.load(Ordering::Relaxed), 42);
}

#[test]
fn s2_readers_run_in_parallel() {
    let rt = runtime(4);
    let value = Arc::new(AtomicUsize::new(0));
    let (start, len) = region_of(&value);

    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_in_flight = Arc::new(AtomicUsize::new(0));

    let runtime = rt.clone();
    let writer_value = value.clone();
    let readers_value = value.clone();
    let readers_in_flight = in_flight.clone();
    let readers_max = max_in_flight.clone();

    rt.run(move || {
        submit(
            &runtime,
            move |handle| register_write_depinfo(handle, start, len),
            move || writer_value.store(7, Ordering::Relaxed),
        );

        for _ in 0..4 {
            let value = readers_value.clone();
            let in_flight = readers_in_flight.clone();
            let max = readers_max.clone();
            submit(
                &runtime,
                move |handle| register_read_depinfo(handle, start, len),
                move || {
                    assert_eq!(value.load(Ordering::Relaxed), 7);
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                },
            );
        }
    });

    assert!(
        max_in_flight.load(Ordering::SeqCst) >= 2,
        "at least two readers must overlap on 4 CPUs"
    );
}

#[test]
fn s3_concurrent_blocks_are_fenced_by_readers() {
    let n = 4;
    let rt = runtime(n);
    let value = Arc::new(AtomicUsize::new(0));
    let (start, len) = region_of(&value);

    let runtime = rt.clone();
    let value_for_run = value.clone();

    rt.run(move || {
        // First block of reducers.
        for _ in 0..n {
            let value = value_for_run.clone();
            submit(
                &runtime,
                move |handle| register_concurrent_depinfo(handle, start, len),
                move || {
                    value.fetch_add(1, Ordering::Relaxed);
                },
            );
        }
        // Readers see the whole first block.
        for _ in 0..n {
            let value = value_for_run.clone();
            submit(
                &runtime,
                move |handle| register_read_depinfo(handle, start, len),
                move || assert_eq!(value.load(Ordering::Relaxed), n),
            );
        }
        // Second block starts only after every reader.
        for _ in 0..n {
            let value = value_for_run.clone();
            submit(
                &runtime,
                move |handle| register_concurrent_depinfo(handle, start, len),
                move || {
                    value.fetch_add(1, Ordering::Relaxed);
                },
            );
        }
    });

    assert_eq!(value.load(Ordering::Relaxed), 2 * n);
}

#[test]
fn s4_commutative_sections_never_overlap() {
    let rt = runtime(4);
    let value = Arc::new(AtomicUsize::new(0));
    let (start, len) = region_of(&value);

    let in_section = Arc::new(AtomicBool::new(false));
    let completed = Arc::new(AtomicUsize::new(0));

    let runtime = rt.clone();
    let section = in_section.clone();
    let done = completed.clone();

    rt.run(move || {
        for _ in 0..2 {
            let section = section.clone();
            let done = done.clone();
            submit(
                &runtime,
                move |handle| {
                    depflow::api::register_commutative_depinfo(handle, start, len)
                },
                move || {
                    let was = section.swap(true, Ordering::SeqCst);
                    assert!(!was, "two commutative bodies overlapped");
                    std::thread::sleep(Duration::from_millis(10));
                    section.store(false, Ordering::SeqCst);
                    done.fetch_add(1, Ordering::SeqCst);
                },
            );
        }
    });

    assert_eq!(completed.load(Ordering::SeqCst), 2);
}

#[test]
fn weak_access_orders_grandchildren_against_siblings() {
    let rt = runtime(4);
    let value = Arc::new(AtomicUsize::new(0));
    let (start, len) = region_of(&value);

    let runtime = rt.clone();
    let runtime_for_parent = rt.clone();
    let parent_value = value.clone();
    let reader_value = value.clone();
    let observed = Arc::new(AtomicUsize::new(0));
    let observed_by_reader = observed.clone();

    rt.run(move || {
        // The parent only declares the region weakly; the real write is
        // performed by its child.
        submit(
            &runtime,
            move |handle| register_weak_write_depinfo(handle, start, len),
            move || {
                let value = parent_value.clone();
                submit(
                    &runtime_for_parent,
                    move |handle| register_write_depinfo(handle, start, len),
                    move || {
                        std::thread::sleep(Duration::from_millis(10));
                        value.store(99, Ordering::Relaxed);
                    },
                );
            },
        );

        // This sibling reader must wait for the grandchild's write even
        // though the parent itself never touches the region.
        submit(
            &runtime,
            move |handle| register_read_depinfo(handle, start, len),
            move || {
                observed_by_reader.store(reader_value.load(Ordering::Relaxed), Ordering::Relaxed)
            },
        );
    });

    assert_eq!(observed.load(Ordering::Relaxed), 99);
}

#[test]
fn partial_overlap_fragments_and_orders_by_byte() {
    let rt = runtime(2);
    let buffer = Arc::new([0u8; 16].map(|_| AtomicUsize::new(0)));
    let base = buffer.as_ptr() as usize;
    let stride = std::mem::size_of::<AtomicUsize>();

    let runtime = rt.clone();
    let writer_buffer = buffer.clone();
    let reader_buffer = buffer.clone();
    let sum = Arc::new(AtomicUsize::new(0));
    let sum_for_reader = sum.clone();

    rt.run(move || {
        // Writer covers the whole buffer.
        submit(
            &runtime,
            move |handle| register_write_depinfo(handle, base, 16 * stride),
            move || {
                for slot in writer_buffer.iter() {
                    slot.store(1, Ordering::Relaxed);
                }
            },
        );
        // Reader covers only the second half; registration fragments the
        // writer's pending access.
        submit(
            &runtime,
            move |handle| register_read_depinfo(handle, base + 8 * stride, 8 * stride),
            move || {
                let total: usize = reader_buffer[8..]
                    .iter()
                    .map(|slot| slot.load(Ordering::Relaxed))
                    .sum();
                sum_for_reader.store(total, Ordering::Relaxed);
            },
        );
    });

    assert_eq!(sum.load(Ordering::Relaxed), 8);
}
