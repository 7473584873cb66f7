use crate::dependencies::region::Region;
use crate::dependencies::sequence::RegionSequence;
use crate::instrument::DataAccessId;
use crate::task::Task;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

/// The declared intent of a task over a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessType {
    Read,
    Write,
    ReadWrite,
    Concurrent,
    Commutative,
}

impl AccessType {
    /// Every type except `Read` may mutate the region and therefore acts
    /// as a barrier for later readers.
    #[inline]
    pub fn is_writer(self) -> bool {
        !matches!(self, AccessType::Read)
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => AccessType::Read,
            1 => AccessType::Write,
            2 => AccessType::ReadWrite,
            3 => AccessType::Concurrent,
            4 => AccessType::Commutative,
            _ => unreachable!("corrupt access type tag: {raw}"),
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            AccessType::Read => 0,
            AccessType::Write => 1,
            AccessType::ReadWrite => 2,
            AccessType::Concurrent => 3,
            AccessType::Commutative => 4,
        }
    }
}

/// One access of one task to one region fragment.
///
/// The access lives in exactly one sequence chain (the forward link that
/// owns it) and in its originator's access table. The originator pointer
/// is weak: accesses never extend task lifetime.
///
/// Satisfaction and completion fields are atomics so that other sequences
/// (super-access completion, nested-head propagation) can read them
/// without taking this sequence's lock. They are only ever *written* under
/// the owning sequence's lock, except `completion_countdown`.
pub(crate) struct DataAccess {
    pub(crate) region: Region,
    pub(crate) originator: Weak<Task>,
    pub(crate) instrumentation_id: DataAccessId,

    access_type: AtomicU8,
    weak: AtomicBool,

    read_satisfied: AtomicBool,
    write_satisfied: AtomicBool,
    globally_satisfied: AtomicBool,

    /// The originator's body has returned and this access was unregistered.
    originator_finished: AtomicBool,
    /// Fully complete: originator finished and every nested sequence
    /// under this access has drained.
    complete: AtomicBool,

    /// 1 for the originator, plus 1 per live nested sequence.
    completion_countdown: AtomicU32,

    /// Sequences created by child tasks inside this access's region.
    /// Guarded by its own mutex because registration happens under the
    /// child domain's bottom-map lock, not this sequence's lock.
    subsequences: Mutex<SmallVec<[Arc<RegionSequence>; 2]>>,

    /// The sequence whose chain currently holds this access. A lookup
    /// back-pointer only; it never extends the sequence's lifetime.
    sequence: Mutex<Weak<RegionSequence>>,
}

impl DataAccess {
    pub(crate) fn new(
        region: Region,
        access_type: AccessType,
        weak: bool,
        originator: Weak<Task>,
        instrumentation_id: DataAccessId,
    ) -> Arc<Self> {
        Arc::new(Self {
            region,
            originator,
            instrumentation_id,
            access_type: AtomicU8::new(access_type.as_u8()),
            weak: AtomicBool::new(weak),
            read_satisfied: AtomicBool::new(false),
            write_satisfied: AtomicBool::new(false),
            globally_satisfied: AtomicBool::new(false),
            originator_finished: AtomicBool::new(false),
            complete: AtomicBool::new(false),
            completion_countdown: AtomicU32::new(1),
            subsequences: Mutex::new(SmallVec::new()),
            sequence: Mutex::new(Weak::new()),
        })
    }

    pub(crate) fn set_sequence(&self, sequence: &Arc<RegionSequence>) {
        *self.sequence.lock() = Arc::downgrade(sequence);
    }

    pub(crate) fn sequence(&self) -> Option<Arc<RegionSequence>> {
        self.sequence.lock().upgrade()
    }

    pub(crate) fn access_type(&self) -> AccessType {
        AccessType::from_u8(self.access_type.load(Ordering::Acquire))
    }

    pub(crate) fn set_access_type(&self, access_type: AccessType) {
        self.access_type.store(access_type.as_u8(), Ordering::Release);
    }

    pub(crate) fn is_weak(&self) -> bool {
        self.weak.load(Ordering::Acquire)
    }

    pub(crate) fn set_weak(&self, weak: bool) {
        self.weak.store(weak, Ordering::Release);
    }

    pub(crate) fn read_satisfied(&self) -> bool {
        self.read_satisfied.load(Ordering::Acquire)
    }

    pub(crate) fn write_satisfied(&self) -> bool {
        self.write_satisfied.load(Ordering::Acquire)
    }

    pub(crate) fn globally_satisfied(&self) -> bool {
        self.globally_satisfied.load(Ordering::Acquire)
    }

    /// Update the satisfaction flags. Returns true if global satisfaction
    /// was newly reached by this update.
    pub(crate) fn set_satisfaction(&self, read: bool, write: bool, global: bool) -> bool {
        self.read_satisfied.store(read, Ordering::Release);
        self.write_satisfied.store(write, Ordering::Release);
        let was = self.globally_satisfied.swap(global, Ordering::AcqRel);
        global && !was
    }

    /// Revoke satisfaction after a type upgrade.
    pub(crate) fn revoke_satisfaction(&self) {
        self.write_satisfied.store(false, Ordering::Release);
        self.globally_satisfied.store(false, Ordering::Release);
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    pub(crate) fn mark_complete(&self) {
        self.complete.store(true, Ordering::Release);
    }

    pub(crate) fn originator_finished(&self) -> bool {
        self.originator_finished.load(Ordering::Acquire)
    }

    pub(crate) fn mark_originator_finished(&self) {
        self.originator_finished.store(true, Ordering::Release);
    }

    /// Account a new nested sequence under this access.
    pub(crate) fn increase_completion_countdown(&self) {
        let previous = self.completion_countdown.fetch_add(1, Ordering::AcqRel);
        assert!(previous > 0, "nested sequence added to a complete access");
    }

    /// Returns true when the countdown reaches zero, i.e. the access is
    /// now fully complete.
    pub(crate) fn decrease_completion_countdown(&self) -> bool {
        let previous = self.completion_countdown.fetch_sub(1, Ordering::AcqRel);
        assert!(previous > 0, "access completion countdown underflow");
        previous == 1
    }

    pub(crate) fn register_subsequence(&self, sequence: Arc<RegionSequence>) {
        self.subsequences.lock().push(sequence);
        self.increase_completion_countdown();
    }

    /// Track a nested sequence without touching the countdown. Used by
    /// fragmentation, which accounts the countdown transfers itself.
    pub(crate) fn adopt_subsequence(&self, sequence: Arc<RegionSequence>) {
        self.subsequences.lock().push(sequence);
    }

    /// Overwrite the countdown of a freshly cloned fragment.
    pub(crate) fn reset_completion_countdown(&self, value: u32) {
        self.completion_countdown.store(value, Ordering::Release);
    }

    pub(crate) fn subsequences(&self) -> SmallVec<[Arc<RegionSequence>; 2]> {
        self.subsequences.lock().clone()
    }

    pub(crate) fn completion_countdown_value(&self) -> u32 {
        self.completion_countdown.load(Ordering::Acquire)
    }

    pub(crate) fn originator_arc(&self) -> Arc<Task> {
        self.originator
            .upgrade()
            .expect("access outlived its originator task")
    }
}

impl std::fmt::Debug for DataAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataAccess")
            .field("region", &self.region)
            .field("type", &self.access_type())
            .field("weak", &self.is_weak())
            .field("read", &self.read_satisfied())
            .field("write", &self.write_satisfied())
            .field("global", &self.globally_satisfied())
            .field("complete", &self.is_complete())
            .finish()
    }
}
