//! depflow — the core of a task-parallel runtime.
//!
//! Programs emit tasks annotated with data-access intents (read, write,
//! readwrite, concurrent, commutative, each optionally weak). The
//! dependency engine discovers the implicit dependency graph from those
//! intents, releases tasks the moment their predecessors' accesses are
//! satisfied, and dispatches them onto a pool of worker threads bound to
//! CPUs whose availability can change at runtime.
//!
//! ```no_run
//! use depflow::api::{register_read_depinfo, register_write_depinfo};
//! use depflow::{Runtime, TaskFlags, TaskInfo};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let rt = Arc::new(Runtime::builder().num_cpus(4).try_build().unwrap());
//! let value = Arc::new(AtomicUsize::new(0));
//! let region = Arc::as_ptr(&value) as usize;
//!
//! let runtime = rt.clone();
//! rt.run(move || {
//!     let writer = {
//!         let value = value.clone();
//!         TaskInfo::builder(move |_, _| value.store(42, Ordering::Relaxed))
//!             .register_depinfo(move |handle| register_write_depinfo(handle, region, 8))
//!             .build()
//!     };
//!     let reader = {
//!         let value = value.clone();
//!         TaskInfo::builder(move |_, _| assert_eq!(value.load(Ordering::Relaxed), 42))
//!             .register_depinfo(move |handle| register_read_depinfo(handle, region, 8))
//!             .build()
//!     };
//!
//!     // The reader is released only once the writer's access completes.
//!     let handle = runtime.create_task(writer, None, TaskFlags::empty());
//!     runtime.submit_task(handle);
//!     let handle = runtime.create_task(reader, None, TaskFlags::empty());
//!     runtime.submit_task(handle);
//! });
//! ```

pub mod api;
pub mod dependencies;
pub mod instrument;

mod config;
mod context;
mod executors;
mod runtime;
mod scheduling;
mod task;
mod utils;

pub use config::Builder;
pub use dependencies::region::Region;
pub use dependencies::AccessType;
pub use executors::ActivationStatus;
pub use runtime::Runtime;
pub use scheduling::{ReadyTaskHint, SchedulerKind};
pub use task::{ArgsSlot, IterationBounds, TaskBody, TaskFlags, TaskHandle, TaskInfo};
