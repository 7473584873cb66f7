//! Instrumentation event surface.
//!
//! The runtime core emits these events; collaborators (trace collectors,
//! dependency-graph viewers) implement the trait. Every method has a no-op
//! default and must be safe to call while a sequence lock is held, so
//! implementations must not call back into the runtime.

use crate::dependencies::region::Region;
use crate::dependencies::AccessType;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identifier of a data access (or of an access sequence, which shares the
/// id space).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataAccessId(pub u64);

/// Identifier of a task, as reported in task-creation events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub u64);

/// Identifier of an access group (one group per access sequence).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessGroupId(pub u64);

static NEXT_DATA_ACCESS_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_ACCESS_GROUP_ID: AtomicU64 = AtomicU64::new(1);

pub fn fresh_data_access_id() -> DataAccessId {
    DataAccessId(NEXT_DATA_ACCESS_ID.fetch_add(1, Ordering::Relaxed))
}

pub(crate) fn fresh_access_group_id() -> AccessGroupId {
    AccessGroupId(NEXT_ACCESS_GROUP_ID.fetch_add(1, Ordering::Relaxed))
}

#[allow(unused_variables)]
pub trait Instrument: Send + Sync {
    /// A new data access was recorded. Returns the identifier under which
    /// later events about this access are reported.
    fn created_data_access(
        &self,
        super_access: Option<DataAccessId>,
        access_type: AccessType,
        weak: bool,
        region: Region,
        read_satisfied: bool,
        write_satisfied: bool,
        globally_satisfied: bool,
        originator: TaskId,
    ) -> DataAccessId {
        fresh_data_access_id()
    }

    /// An access had its type upgraded. `becomes_unsatisfied` indicates a
    /// previously satisfied access lost its satisfaction as a result.
    fn upgraded_data_access(
        &self,
        access: DataAccessId,
        previous_type: AccessType,
        new_type: AccessType,
        becomes_unsatisfied: bool,
        triggerer: TaskId,
    ) {
    }

    fn data_access_becomes_satisfied(
        &self,
        access: DataAccessId,
        read_satisfied: bool,
        write_satisfied: bool,
        globally_satisfied: bool,
        triggerer: TaskId,
        target: TaskId,
    ) {
    }

    /// An access was split; the returned id names the new fragment.
    fn fragmented_data_access(
        &self,
        access: DataAccessId,
        new_region: Region,
        triggerer: TaskId,
    ) -> DataAccessId {
        fresh_data_access_id()
    }

    fn completed_data_access(&self, access: DataAccessId, triggerer: TaskId) {}

    fn data_access_becomes_removable(&self, access: DataAccessId, triggerer: TaskId) {}

    fn removed_data_access(&self, access: DataAccessId, triggerer: TaskId) {}

    fn linked_data_accesses(
        &self,
        source: DataAccessId,
        sink_task: TaskId,
        region: Region,
        direct: bool,
        bidirectional: bool,
        triggerer: TaskId,
    ) {
    }

    fn unlinked_data_accesses(
        &self,
        source: DataAccessId,
        sink_task: TaskId,
        direct: bool,
        triggerer: TaskId,
    ) {
    }

    /// An access sequence was moved under a different super-access (for
    /// example by fragmentation of the parent access).
    fn reparented_data_access(
        &self,
        old_super: Option<DataAccessId>,
        new_super: Option<DataAccessId>,
        access: DataAccessId,
        triggerer: TaskId,
    ) {
    }

    fn begin_access_group(
        &self,
        parent_task: Option<TaskId>,
        group: AccessGroupId,
        new_group: bool,
    ) {
    }

    fn added_task_to_access_group(&self, group: AccessGroupId, task: TaskId) {}

    fn removed_task_from_access_group(&self, group: AccessGroupId, task: TaskId) {}

    fn suspending_compute_place(&self, cpu_index: usize) {}

    fn resumed_compute_place(&self, cpu_index: usize) {}

    fn created_task(&self, task: TaskId, task_type: u32, label: Option<&str>) {}

    fn destroyed_task(&self, task: TaskId) {}

    fn task_is_being_deleted(&self, task: TaskId) {}
}

/// The default collaborator: accepts everything, records nothing.
#[derive(Debug, Default)]
pub struct NullInstrument;

impl Instrument for NullInstrument {}

/// A recording collaborator that stores a compact trace of the events it
/// receives. Intended for assertions in tests and for offline dumps.
#[derive(Debug, Default)]
pub struct Recorder {
    events: parking_lot::Mutex<Vec<Event>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Created {
        access: DataAccessId,
        access_type: AccessType,
        weak: bool,
        globally_satisfied: bool,
        originator: TaskId,
    },
    Upgraded {
        access: DataAccessId,
        previous_type: AccessType,
        new_type: AccessType,
        becomes_unsatisfied: bool,
    },
    Satisfied {
        access: DataAccessId,
        target: TaskId,
    },
    Fragmented {
        access: DataAccessId,
        fragment: DataAccessId,
    },
    Completed(DataAccessId),
    Removable(DataAccessId),
    Removed(DataAccessId),
    TaskCreated(TaskId),
    TaskDestroyed(TaskId),
    CpuSuspended(usize),
    CpuResumed(usize),
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }

    fn record(&self, event: Event) {
        self.events.lock().push(event);
    }
}

impl Instrument for Recorder {
    fn created_data_access(
        &self,
        _super_access: Option<DataAccessId>,
        access_type: AccessType,
        weak: bool,
        _region: Region,
        _read_satisfied: bool,
        _write_satisfied: bool,
        globally_satisfied: bool,
        originator: TaskId,
    ) -> DataAccessId {
        let access = fresh_data_access_id();
        self.record(Event::Created {
            access,
            access_type,
            weak,
            globally_satisfied,
            originator,
        });
        access
    }

    fn upgraded_data_access(
        &self,
        access: DataAccessId,
        previous_type: AccessType,
        new_type: AccessType,
        becomes_unsatisfied: bool,
        _triggerer: TaskId,
    ) {
        self.record(Event::Upgraded {
            access,
            previous_type,
            new_type,
            becomes_unsatisfied,
        });
    }

    fn data_access_becomes_satisfied(
        &self,
        access: DataAccessId,
        _read_satisfied: bool,
        _write_satisfied: bool,
        globally_satisfied: bool,
        _triggerer: TaskId,
        target: TaskId,
    ) {
        if globally_satisfied {
            self.record(Event::Satisfied { access, target });
        }
    }

    fn fragmented_data_access(
        &self,
        access: DataAccessId,
        _new_region: Region,
        _triggerer: TaskId,
    ) -> DataAccessId {
        let fragment = fresh_data_access_id();
        self.record(Event::Fragmented { access, fragment });
        fragment
    }

    fn completed_data_access(&self, access: DataAccessId, _triggerer: TaskId) {
        self.record(Event::Completed(access));
    }

    fn data_access_becomes_removable(&self, access: DataAccessId, _triggerer: TaskId) {
        self.record(Event::Removable(access));
    }

    fn removed_data_access(&self, access: DataAccessId, _triggerer: TaskId) {
        self.record(Event::Removed(access));
    }

    fn suspending_compute_place(&self, cpu_index: usize) {
        self.record(Event::CpuSuspended(cpu_index));
    }

    fn resumed_compute_place(&self, cpu_index: usize) {
        self.record(Event::CpuResumed(cpu_index));
    }

    fn created_task(&self, task: TaskId, _task_type: u32, _label: Option<&str>) {
        self.record(Event::TaskCreated(task));
    }

    fn destroyed_task(&self, task: TaskId) {
        self.record(Event::TaskDestroyed(task));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(NullInstrument: Send, Sync);
    assert_impl_all!(Recorder: Send, Sync);

    #[test]
    fn fresh_ids_are_unique() {
        let a = fresh_data_access_id();
        let b = fresh_data_access_id();
        assert_ne!(a, b);
    }
}
