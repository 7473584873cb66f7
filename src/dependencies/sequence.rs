use crate::dependencies::access::{AccessType, DataAccess};
use crate::dependencies::region::Region;
use crate::dependencies::registry::{DepAction, PropagationBatch};
use crate::instrument::{fresh_access_group_id, AccessGroupId, Instrument, TaskId};
use crate::task::Task;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::sync::Arc;

/// The chain of accesses to one region fragment, ordered by arrival.
///
/// A sequence lives in exactly one task's bottom map. Sequences of nested
/// tasks reference the parent access they sit under through `supers`;
/// that link seeds the satisfaction gate of the chain head.
///
/// Lock discipline: the chain mutex is a leaf with one exception, the
/// fragmentation path, which may take the chain lock of a sequence one
/// nesting level *down*. Locks are therefore only ever nested in domain
/// depth order and never towards an ancestor.
pub(crate) struct RegionSequence {
    pub(crate) region: Region,
    pub(crate) group_id: AccessGroupId,
    chain: Mutex<Chain>,
}

pub(crate) struct Chain {
    entries: VecDeque<Arc<DataAccess>>,

    /// The commutative access currently allowed to run on this region.
    commutative_holder: Option<Arc<DataAccess>>,

    /// Parent accesses this sequence is nested under. More than one only
    /// after the parent access was fragmented across this region.
    supers: SmallVec<[Arc<DataAccess>; 1]>,

    /// The drain of this sequence has been reported to `supers`.
    drained_reported: bool,

    /// Replaced by fragments; must not report drains or accept accesses.
    retired: bool,
}

/// Result of adding a task access to a sequence.
pub(crate) enum AddAccess {
    /// Merged into the task's previous access on this region. `newly_gating`
    /// is set when an access that did not block the task before does now
    /// (upgrade revoked satisfaction, or a weak access became strong while
    /// unsatisfied).
    Merged {
        access: Arc<DataAccess>,
        newly_gating: bool,
    },
    /// A new access was linked at the bottom of the chain.
    Linked {
        access: Arc<DataAccess>,
        satisfied: bool,
    },
}

/// Walk state threaded through a chain while computing satisfaction.
#[derive(Clone, Copy)]
struct WalkFlags {
    /// An unfinished access (or an unsatisfied inherited gate) precedes.
    seen_any: bool,
    /// An unfinished writer-type access precedes.
    seen_writer: bool,
    /// Every preceding entry is `Concurrent` and the gate is open.
    all_concurrent: bool,
    /// Every preceding entry is `Commutative` and the gate is open.
    all_commutative: bool,
}

impl WalkFlags {
    fn seed(supers: &[Arc<DataAccess>]) -> Self {
        let read_gate = supers.iter().all(|s| s.read_satisfied());
        let write_gate = supers.iter().all(|s| s.write_satisfied());
        WalkFlags {
            seen_any: !write_gate,
            seen_writer: !read_gate,
            all_concurrent: write_gate,
            all_commutative: write_gate,
        }
    }

    fn account(&mut self, access_type: AccessType) {
        self.seen_any = true;
        if access_type.is_writer() {
            self.seen_writer = true;
        }
        if access_type != AccessType::Concurrent {
            self.all_concurrent = false;
        }
        if access_type != AccessType::Commutative {
            self.all_commutative = false;
        }
    }
}

impl RegionSequence {
    pub(crate) fn new(region: Region, supers: SmallVec<[Arc<DataAccess>; 1]>) -> Arc<Self> {
        Arc::new(Self {
            region,
            group_id: fresh_access_group_id(),
            chain: Mutex::new(Chain {
                entries: VecDeque::new(),
                commutative_holder: None,
                supers,
                drained_reported: false,
                retired: false,
            }),
        })
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.chain.lock().entries.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.chain.lock().entries.len()
    }

    /// Record an access of `task` at the bottom of this chain, applying
    /// the same-task merge/upgrade rules when the bottom entry already
    /// belongs to `task`.
    pub(crate) fn add_access(
        self: &Arc<Self>,
        task: &Arc<Task>,
        access_type: AccessType,
        weak: bool,
        instrument: &dyn Instrument,
    ) -> AddAccess {
        let mut chain = self.chain.lock();
        assert!(!chain.retired, "access added to a retired sequence");

        let same_task_bottom = chain
            .entries
            .back()
            .map(|last| std::ptr::eq(last.originator.as_ptr(), Arc::as_ptr(task)))
            .unwrap_or(false);

        if same_task_bottom {
            return self.merge_access(&mut chain, task, access_type, weak, instrument);
        }

        // Compute the new entry's satisfaction from the whole chain.
        let mut flags = WalkFlags::seed(&chain.supers);
        for entry in &chain.entries {
            flags.account(entry.access_type());
        }

        let (read_s, write_s, global_s) = satisfaction_for(access_type, &flags, &chain, None);

        let super_id = chain.supers.first().map(|s| s.instrumentation_id);
        let id = instrument.created_data_access(
            super_id,
            access_type,
            weak,
            self.region,
            read_s,
            write_s,
            global_s,
            task.instrumentation_id(),
        );

        let access = DataAccess::new(self.region, access_type, weak, Arc::downgrade(task), id);
        access.set_sequence(self);
        access.set_satisfaction(read_s, write_s, global_s);

        if global_s && access_type == AccessType::Commutative {
            chain.commutative_holder = Some(access.clone());
        }

        if let Some(previous) = chain.entries.back() {
            instrument.linked_data_accesses(
                previous.instrumentation_id,
                task.instrumentation_id(),
                self.region,
                true,
                false,
                task.instrumentation_id(),
            );
        }
        instrument.added_task_to_access_group(self.group_id, task.instrumentation_id());

        chain.entries.push_back(access.clone());

        AddAccess::Linked {
            access,
            satisfied: global_s,
        }
    }

    /// The same task re-declares the region: apply the upgrade table.
    fn merge_access(
        self: &Arc<Self>,
        chain: &mut Chain,
        task: &Arc<Task>,
        new_type: AccessType,
        new_weak: bool,
        instrument: &dyn Instrument,
    ) -> AddAccess {
        let access = chain.entries.back().expect("merge on empty chain").clone();
        let previous_type = access.access_type();
        let task_id = task.instrumentation_id();

        let was_gating = !access.is_weak() && !access.globally_satisfied();

        // A strong re-declaration strengthens a weak access.
        if access.is_weak() && !new_weak {
            access.set_weak(false);
        }

        use AccessType::*;
        let upgraded_type = match (previous_type, new_type) {
            // Identical, or already subsumed: keep the previous access.
            (a, b) if a == b => None,
            (ReadWrite, Write) | (ReadWrite, Read) | (Write, Read) => None,
            (Write, ReadWrite) => Some(ReadWrite),
            (Read, Write) => Some(Write),
            (Read, ReadWrite) => Some(ReadWrite),
            // Anything involving concurrent/commutative collapses to the
            // most restrictive type.
            _ => Some(ReadWrite),
        };

        let mut becomes_unsatisfied = false;
        if let Some(upgraded) = upgraded_type {
            let strengthens = previous_type == Read || previous_type != upgraded;
            if strengthens && access.globally_satisfied() {
                // The access was satisfied under its weaker type; as a
                // writer it is satisfied only at the head of the chain.
                instrument
                    .removed_task_from_access_group(self.group_id, task_id);
                instrument.added_task_to_access_group(self.group_id, task_id);

                let write_gate = chain.supers.iter().all(|s| s.write_satisfied());
                let is_head = chain
                    .entries
                    .front()
                    .map(|first| Arc::ptr_eq(first, &access))
                    .unwrap_or(false);
                let still_satisfied = is_head && write_gate;

                if !still_satisfied {
                    access.revoke_satisfaction();
                    becomes_unsatisfied = true;
                }
            }

            if previous_type == Commutative {
                // The access leaves the commutative protocol; give the
                // token back.
                if let Some(holder) = &chain.commutative_holder {
                    if Arc::ptr_eq(holder, &access) {
                        chain.commutative_holder = None;
                    }
                }
            }

            access.set_access_type(upgraded);
        }

        instrument.upgraded_data_access(
            access.instrumentation_id,
            previous_type,
            access.access_type(),
            becomes_unsatisfied,
            task_id,
        );

        let now_gating = !access.is_weak() && !access.globally_satisfied();

        AddAccess::Merged {
            access,
            newly_gating: now_gating && !was_gating,
        }
    }

    /// The originator of `access` is done with it and every nested chain
    /// below it has drained: detach it and propagate satisfaction to the
    /// survivors.
    pub(crate) fn complete_and_remove(
        self: &Arc<Self>,
        access: &Arc<DataAccess>,
        instrument: &dyn Instrument,
        triggerer: TaskId,
        batch: &mut PropagationBatch,
    ) {
        let mut chain = self.chain.lock();

        access.mark_complete();
        instrument.completed_data_access(access.instrumentation_id, triggerer);
        instrument.data_access_becomes_removable(access.instrumentation_id, triggerer);

        let position = chain
            .entries
            .iter()
            .position(|e| Arc::ptr_eq(e, access));
        let Some(position) = position else {
            // The chain was fragmented while this completion was in
            // flight; the fragments never carried this access, so there
            // is nothing to unlink.
            debug_assert!(chain.retired);
            instrument.removed_data_access(access.instrumentation_id, triggerer);
            return;
        };

        if let Some(holder) = &chain.commutative_holder {
            if Arc::ptr_eq(holder, access) {
                chain.commutative_holder = None;
            }
        }

        chain.entries.remove(position);

        if let Some(successor) = chain.entries.get(position) {
            instrument.unlinked_data_accesses(
                access.instrumentation_id,
                successor
                    .originator
                    .upgrade()
                    .map(|t| t.instrumentation_id())
                    .unwrap_or(TaskId(0)),
                true,
                triggerer,
            );
        }
        instrument.removed_data_access(access.instrumentation_id, triggerer);

        self.reevaluate_locked(&mut chain, instrument, triggerer, batch);
        self.report_drain_locked(&mut chain, false, batch);
    }

    /// Recompute satisfaction positionally over the whole chain and queue
    /// the effects of every newly satisfied access on `batch`.
    pub(crate) fn reevaluate(
        self: &Arc<Self>,
        instrument: &dyn Instrument,
        triggerer: TaskId,
        batch: &mut PropagationBatch,
    ) {
        let mut chain = self.chain.lock();
        self.reevaluate_locked(&mut chain, instrument, triggerer, batch);
    }

    fn reevaluate_locked(
        self: &Arc<Self>,
        chain: &mut Chain,
        instrument: &dyn Instrument,
        triggerer: TaskId,
        batch: &mut PropagationBatch,
    ) {
        let mut flags = WalkFlags::seed(&chain.supers);
        let mut take_token: Option<Arc<DataAccess>> = None;
        let mut newly_satisfied: SmallVec<[Arc<DataAccess>; 4]> = SmallVec::new();

        for entry in &chain.entries {
            let access_type = entry.access_type();
            let (read_s, write_s, global_s) =
                satisfaction_for(access_type, &flags, chain, take_token.as_ref());

            let read_new = entry.read_satisfied() || read_s;
            let write_new = entry.write_satisfied() || write_s;
            let global_new = entry.globally_satisfied() || global_s;

            let improved = read_new != entry.read_satisfied()
                || write_new != entry.write_satisfied()
                || global_new != entry.globally_satisfied();

            if improved {
                let newly_global = entry.set_satisfaction(read_new, write_new, global_new);
                if newly_global && access_type == AccessType::Commutative {
                    take_token = Some(entry.clone());
                }
                instrument.data_access_becomes_satisfied(
                    entry.instrumentation_id,
                    read_new,
                    write_new,
                    global_new,
                    triggerer,
                    entry
                        .originator
                        .upgrade()
                        .map(|t| t.instrumentation_id())
                        .unwrap_or(TaskId(0)),
                );
                if newly_global {
                    newly_satisfied.push(entry.clone());
                }
            }

            flags.account(access_type);
        }

        if let Some(holder) = take_token {
            chain.commutative_holder = Some(holder);
        }

        for access in newly_satisfied {
            if !access.is_weak() {
                if let Some(task) = access.originator.upgrade() {
                    if task.decrease_predecessors() {
                        batch.ready_tasks.push(task);
                    }
                }
            }
            // Nested chains under this access may now open their gates.
            batch.actions.push_back(DepAction::AccessSatisfied(access));
        }
    }

    /// Queue a drain report to the supers when the chain is empty and the
    /// domain owner can no longer refill it. `force` is used by the
    /// taskwait drain, which guarantees no refill before the next access.
    pub(crate) fn report_drain(&self, force: bool, batch: &mut PropagationBatch) {
        let mut chain = self.chain.lock();
        self.report_drain_locked(&mut chain, force, batch);
    }

    fn report_drain_locked(&self, chain: &mut Chain, force: bool, batch: &mut PropagationBatch) {
        if !chain.entries.is_empty()
            || chain.drained_reported
            || chain.retired
            || chain.supers.is_empty()
        {
            return;
        }
        let owner_finished = chain.supers.iter().all(|s| s.originator_finished());
        if owner_finished || force {
            chain.drained_reported = true;
            batch.actions.push_back(DepAction::SequenceDrained {
                supers: chain.supers.clone(),
            });
        }
    }

    /// Split this sequence into the given disjoint parts (whose union is
    /// exactly this sequence's region). Every live access in the chain is
    /// cloned per part, nested sequences are re-homed onto the fragments
    /// they overlap, and this sequence is retired.
    ///
    /// Returns the fragment sequences in `parts` order, paired with the
    /// per-originator count of additional unsatisfied strong fragments
    /// (the originators' predecessor countdowns must grow by that much).
    pub(crate) fn fragment(
        self: &Arc<Self>,
        parts: &[Region],
        instrument: &dyn Instrument,
        triggerer: TaskId,
    ) -> Vec<Arc<RegionSequence>> {
        let mut chain = self.chain.lock();
        assert!(!chain.retired, "fragmenting a retired sequence");
        debug_assert_eq!(
            parts.iter().map(|p| p.length).sum::<usize>(),
            self.region.length,
            "fragment parts must cover the sequence region"
        );

        let fragments: Vec<Arc<RegionSequence>> = parts
            .iter()
            .map(|part| RegionSequence::new(*part, chain.supers.clone()))
            .collect();

        // The original sequence was counted once in each super; each
        // extra fragment adds one more expected drain report.
        if !chain.drained_reported {
            for super_access in &chain.supers {
                for _ in 1..fragments.len() {
                    super_access.increase_completion_countdown();
                }
                for fragment in &fragments {
                    super_access.adopt_subsequence(fragment.clone());
                }
            }
        }

        for entry in &chain.entries {
            let finished = entry.originator_finished();
            if finished && entry.completion_countdown_value() == 0 {
                // Completion is in flight; the fragments must not carry
                // this access, and the pending completion settles the
                // table and holder accounting.
                continue;
            }

            let originator = entry.originator_arc();
            let entry_type = entry.access_type();
            let was_holder = chain
                .commutative_holder
                .as_ref()
                .map(|h| Arc::ptr_eq(h, entry))
                .unwrap_or(false);

            // Re-home nested sequences onto the fragments they overlap,
            // counting the pending drains per fragment. The nested chain
            // lock is one nesting level down, so taking it here keeps the
            // depth ordering.
            let nested = entry.subsequences();
            let mut pending_per_fragment = vec![0u32; fragments.len()];
            let mut adopted: Vec<Vec<Arc<RegionSequence>>> =
                vec![Vec::new(); fragments.len()];

            let mut fragment_accesses: Vec<Option<Arc<DataAccess>>> =
                vec![None; fragments.len()];
            for (idx, fragment) in fragments.iter().enumerate() {
                if entry.region.overlaps(&fragment.region) {
                    let id = instrument.fragmented_data_access(
                        entry.instrumentation_id,
                        fragment.region,
                        triggerer,
                    );
                    let clone = DataAccess::new(
                        fragment.region,
                        entry_type,
                        entry.is_weak(),
                        entry.originator.clone(),
                        id,
                    );
                    clone.set_satisfaction(
                        entry.read_satisfied(),
                        entry.write_satisfied(),
                        entry.globally_satisfied(),
                    );
                    if finished {
                        clone.mark_originator_finished();
                    }
                    fragment_accesses[idx] = Some(clone);
                }
            }

            for subseq in &nested {
                let mut sub_chain = subseq.chain.lock();
                if sub_chain.retired {
                    continue;
                }
                let reported = sub_chain.drained_reported;
                sub_chain.supers.retain(|s| !Arc::ptr_eq(s, entry));
                for (idx, fragment) in fragments.iter().enumerate() {
                    if !subseq.region.overlaps(&fragment.region) {
                        continue;
                    }
                    if let Some(clone) = &fragment_accesses[idx] {
                        sub_chain.supers.push(clone.clone());
                        adopted[idx].push(subseq.clone());
                        if !reported {
                            pending_per_fragment[idx] += 1;
                        }
                        instrument.reparented_data_access(
                            Some(entry.instrumentation_id),
                            Some(clone.instrumentation_id),
                            subseq_group_as_access_id(subseq),
                            triggerer,
                        );
                    }
                }
            }

            let mut extra_gating = 0usize;
            for (idx, fragment) in fragments.iter().enumerate() {
                let Some(clone) = fragment_accesses[idx].take() else {
                    continue;
                };
                // Countdown: the self unit (unless the originator already
                // finished) plus one per pending nested drain.
                let self_unit = if finished { 0 } else { 1 };
                let countdown = self_unit + pending_per_fragment[idx];
                if countdown == 0 {
                    // Nothing left to wait for on this part: the fragment
                    // is born complete and never enters the chain.
                    instrument.completed_data_access(clone.instrumentation_id, triggerer);
                    instrument.removed_data_access(clone.instrumentation_id, triggerer);
                    continue;
                }
                clone.reset_completion_countdown(countdown);
                for subseq in adopted[idx].drain(..) {
                    clone.adopt_subsequence(subseq);
                }
                clone.set_sequence(fragment);

                let mut fragment_chain = fragment.chain.lock();
                if was_holder && clone.globally_satisfied() {
                    fragment_chain.commutative_holder = Some(clone.clone());
                }
                fragment_chain.entries.push_back(clone.clone());
                drop(fragment_chain);

                if !clone.is_weak() && !clone.globally_satisfied() {
                    extra_gating += 1;
                }

                originator.adopt_access_fragment(clone);
            }

            // The original counted once toward the originator's
            // predecessor countdown; account for the surplus fragments.
            if extra_gating > 1 {
                originator.increase_predecessors((extra_gating - 1) as u32);
            }
            if !finished {
                originator.drop_access(entry);
            }
            // A finished original keeps its table slot and holder pin;
            // the in-flight drain reports complete it through the normal
            // path.
        }

        chain.entries.clear();
        chain.commutative_holder = None;
        chain.retired = true;

        fragments
    }
}

/// Compute the satisfaction triple of an entry given the walk state.
fn satisfaction_for(
    access_type: AccessType,
    flags: &WalkFlags,
    chain: &Chain,
    pending_token: Option<&Arc<DataAccess>>,
) -> (bool, bool, bool) {
    use AccessType::*;
    match access_type {
        Read => (!flags.seen_writer, !flags.seen_any, !flags.seen_writer),
        Write | ReadWrite => (!flags.seen_any, !flags.seen_any, !flags.seen_any),
        Concurrent => (
            flags.all_concurrent,
            flags.all_concurrent,
            flags.all_concurrent,
        ),
        Commutative => {
            let eligible = flags.all_commutative;
            let token_free = chain.commutative_holder.is_none() && pending_token.is_none();
            (eligible, eligible, eligible && token_free)
        }
    }
}

/// Sequences share the data-access id space for instrumentation purposes;
/// use the group id as a stand-in when reporting reparenting.
fn subseq_group_as_access_id(seq: &RegionSequence) -> crate::instrument::DataAccessId {
    crate::instrument::DataAccessId(seq.group_id.0)
}

impl std::fmt::Debug for RegionSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let chain = self.chain.lock();
        f.debug_struct("RegionSequence")
            .field("region", &self.region)
            .field("entries", &chain.entries.len())
            .field("retired", &chain.retired)
            .finish()
    }
}
