use crate::dependencies::access::DataAccess;
use crate::dependencies::region::Region;
use crate::dependencies::sequence::RegionSequence;
use crate::instrument::{Instrument, TaskId};
use parking_lot::{Mutex, MutexGuard};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-task dependency state: the task's own accesses plus the bottom map
/// of its children's sequences.
///
/// The bottom map holds, for each byte of address space touched by direct
/// children, exactly one entry: the sequence whose chain tail is the most
/// recent child access on that region fragment. Entries are pairwise
/// disjoint; partial overlaps are resolved by fragmenting the sequence.
///
/// Lock ordering: this table's lock precedes the sequence locks of the
/// sequences it owns, which precede tables/sequences one nesting level
/// down. Teardown paths snapshot under the lock and release it before
/// touching sequences.
pub(crate) struct TaskDataAccesses {
    state: Mutex<AccessTableState>,
    deleted: AtomicBool,
}

#[derive(Default)]
pub(crate) struct AccessTableState {
    /// The owning task's accesses, fragmented to mirror the sequences
    /// they live in.
    pub(crate) accesses: Vec<Arc<DataAccess>>,

    /// start-of-region -> sequence; regions are disjoint.
    pub(crate) bottom_map: BTreeMap<usize, Arc<RegionSequence>>,
}

impl TaskDataAccesses {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(AccessTableState::default()),
            deleted: AtomicBool::new(false),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, AccessTableState> {
        self.state.lock()
    }

    pub(crate) fn has_been_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    pub(crate) fn mark_deleted(&self) {
        let was = self.deleted.swap(true, Ordering::AcqRel);
        assert!(!was, "task access table deleted twice");
    }

    /// Reused collaborators get a fresh table between assignments.
    pub(crate) fn reset_for_reuse(&self) {
        let mut state = self.state.lock();
        assert!(state.accesses.is_empty());
        state.bottom_map.clear();
        self.deleted.store(false, Ordering::Release);
    }

    pub(crate) fn push_access(&self, access: Arc<DataAccess>) {
        debug_assert!(!self.has_been_deleted());
        self.state.lock().accesses.push(access);
    }

    pub(crate) fn remove_access(&self, access: &Arc<DataAccess>) {
        let mut state = self.state.lock();
        state.accesses.retain(|a| !Arc::ptr_eq(a, access));
    }

    pub(crate) fn snapshot_accesses(&self) -> Vec<Arc<DataAccess>> {
        self.state.lock().accesses.clone()
    }

    /// Drain the bottom map, returning every sequence it held.
    pub(crate) fn drain_bottom_map(&self) -> Vec<Arc<RegionSequence>> {
        let mut state = self.state.lock();
        let drained: Vec<_> = state.bottom_map.values().cloned().collect();
        state.bottom_map.clear();
        drained
    }
}

impl AccessTableState {
    /// Resolve `region` against the bottom map into a set of sequences
    /// whose regions exactly partition it, fragmenting partially
    /// overlapped sequences and creating fresh sequences (nested under
    /// the domain owner's overlapping accesses) for the uncovered holes.
    pub(crate) fn decompose(
        &mut self,
        region: Region,
        instrument: &dyn Instrument,
        triggerer: TaskId,
    ) -> SmallVec<[Arc<RegionSequence>; 4]> {
        let mut result: SmallVec<[Arc<RegionSequence>; 4]> = SmallVec::new();
        let mut holes: SmallVec<[Region; 4]> = SmallVec::new();
        holes.push(region);

        for start in self.overlapping_starts(&region) {
            let sequence = self
                .bottom_map
                .get(&start)
                .expect("bottom map key vanished")
                .clone();
            let existing = sequence.region;
            let overlap = existing
                .intersect(&region)
                .expect("overlapping entry does not overlap");

            let mut next_holes: SmallVec<[Region; 4]> = SmallVec::new();
            for hole in holes.drain(..) {
                next_holes.extend(hole.subtract(&overlap).iter());
            }
            holes = next_holes;

            if overlap == existing {
                result.push(sequence);
                continue;
            }

            // Partial overlap: split the sequence along the overlap
            // boundary and swap the fragments into the map.
            let mut parts: SmallVec<[Region; 3]> = SmallVec::new();
            parts.push(overlap);
            parts.extend(existing.subtract(&overlap).iter());
            parts.sort_by_key(|p| p.start);

            let fragments = sequence.fragment(&parts, instrument, triggerer);
            self.bottom_map.remove(&start);
            for fragment in &fragments {
                self.bottom_map
                    .insert(fragment.region.start, fragment.clone());
                if fragment.region == overlap {
                    result.push(fragment.clone());
                }
            }
        }

        for hole in holes {
            let supers: SmallVec<[Arc<DataAccess>; 1]> = self
                .accesses
                .iter()
                .filter(|a| a.region.overlaps(&hole))
                .cloned()
                .collect();
            let sequence = RegionSequence::new(hole, supers.clone());
            instrument.begin_access_group(Some(triggerer), sequence.group_id, true);
            for super_access in &supers {
                super_access.register_subsequence(sequence.clone());
            }
            self.bottom_map
                .insert(hole.start, sequence.clone());
            result.push(sequence);
        }

        result
    }

    fn overlapping_starts(&self, region: &Region) -> SmallVec<[usize; 4]> {
        let mut starts: SmallVec<[usize; 4]> = SmallVec::new();
        if let Some((start, sequence)) = self.bottom_map.range(..region.start).next_back() {
            if sequence.region.end() > region.start {
                starts.push(*start);
            }
        }
        for (start, _) in self.bottom_map.range(region.start..region.end()) {
            starts.push(*start);
        }
        starts
    }
}
