//! N-queens with nested reductions and no taskwaits: the completion of
//! the root solver access must transitively cover every descendant.

use depflow::api::{register_concurrent_depinfo, register_read_depinfo};
use depflow::{Runtime, SchedulerKind, TaskFlags, TaskInfo};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const N: usize = 12;
const EXPECTED: u64 = 14_200;

struct SolNode {
    row: i64,
    prev: Option<Arc<SolNode>>,
}

fn attacked(col: usize, row: i64, mut sol: &Arc<SolNode>) -> bool {
    for offset in 0..col {
        let diff = (sol.row - row).abs() as usize;
        if diff == 0 || diff == offset + 1 {
            return true;
        }
        match &sol.prev {
            Some(prev) => sol = prev,
            None => break,
        }
    }
    false
}

/// Spawn one reduction task per candidate placement; every task adds its
/// subtree's solutions into the shared counter through a concurrent
/// access registered in its parent's domain.
fn solve(rt: &Arc<Runtime>, col: usize, sol: Arc<SolNode>, count: &Arc<AtomicU64>) {
    if col == N {
        count.fetch_add(1, Ordering::Relaxed);
        return;
    }

    let start = Arc::as_ptr(count) as usize;
    let len = std::mem::size_of::<AtomicU64>();

    for row in 0..N as i64 {
        if attacked(col, row, &sol) {
            continue;
        }
        let next = Arc::new(SolNode {
            row,
            prev: Some(sol.clone()),
        });
        let rt_inner = rt.clone();
        let count_inner = count.clone();
        let info = TaskInfo::builder(move |_, _| {
            solve(&rt_inner, col + 1, next.clone(), &count_inner);
        })
        .register_depinfo(move |handle| register_concurrent_depinfo(handle, start, len))
        .build();
        let handle = rt.create_task(info, None, TaskFlags::empty());
        rt.submit_task(handle);
    }
}

#[test]
fn nested_reductions_count_all_solutions() {
    let rt = Arc::new(
        Runtime::builder()
            .num_cpus(4)
            .scheduler(SchedulerKind::ImmediateSuccessor)
            .try_build()
            .unwrap(),
    );
    let count = Arc::new(AtomicU64::new(0));
    let start = Arc::as_ptr(&count) as usize;
    let len = std::mem::size_of::<AtomicU64>();

    let runtime = rt.clone();
    let count_for_run = count.clone();
    rt.run(move || {
        let solver = {
            let rt = runtime.clone();
            let count = count_for_run.clone();
            TaskInfo::builder(move |_, _| {
                let root = Arc::new(SolNode {
                    row: -1,
                    prev: None,
                });
                solve(&rt, 0, root, &count);
            })
            .register_depinfo(move |handle| register_concurrent_depinfo(handle, start, len))
            .build()
        };
        let handle = runtime.create_task(solver, None, TaskFlags::empty());
        runtime.submit_task(handle);

        let count = count_for_run.clone();
        let check = TaskInfo::builder(move |_, _| {
            assert_eq!(count.load(Ordering::Relaxed), EXPECTED);
        })
        .register_depinfo(move |handle| register_read_depinfo(handle, start, len))
        .build();
        let handle = runtime.create_task(check, None, TaskFlags::empty());
        runtime.submit_task(handle);
    });

    assert_eq!(count.load(Ordering::Relaxed), EXPECTED);
}
