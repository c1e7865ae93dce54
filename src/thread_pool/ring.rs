use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{ScheduleError, Task};

// Mark a slot holds before its first reservation. Must be distinct from every
// reachable commit index and from the complement of every reachable release
// index, and in particular must not be 0, or slot 0 would look committable on
// an empty ring.
const MARK_VACANT: usize = usize::MAX >> 1;

// The four heads form a pipeline: reserve -> commit -> request -> release.
// Every access uses SeqCst, matching the full-barrier semantics of the
// compare-and-swap this protocol was built around; the sleep/wake handshake
// in the worker relies on a single total order of commit-head and
// worker-status updates.
const ORD: Ordering = Ordering::SeqCst;

/// One ring buffer element: a task plus the mark that says which pipeline
/// stage currently owns it.
///
/// mark == i (the slot's absolute commit index): the producer that reserved
/// index i finished writing, the commit head may advance past it.
/// mark == !i (complement of its release index): the consumer that claimed
/// index i took the task out, the release head may advance past it.
/// Anything else: the slot is in flux, retry later.
struct Slot {
    mark: AtomicUsize,
    task: UnsafeCell<Option<Task>>,
}

/// The bounded multi-producer/multi-consumer task queue at the heart of the
/// pool.
///
/// A single reserve/commit head pair cannot support concurrent producers:
/// the producer that reserves index N may finish writing after the producer
/// that reserved N+1, so claiming a slot and publishing its contents must be
/// distinct steps. The mark protocol advances the commit head strictly in
/// reservation order no matter which producer finishes first, and the same
/// split (request vs. release) lets consumers claim adjacent slots
/// concurrently while capacity accounting stays exact.
pub(super) struct TaskRing {
    reserve_head: AtomicUsize,
    commit_head: AtomicUsize,
    request_head: AtomicUsize,
    release_head: AtomicUsize,
    slots: Box<[Slot]>,
    mask: usize,
}

// Slot contents are only touched by the unique producer that reserved the
// slot or the unique consumer that claimed it; the mark/head protocol
// serializes those two.
unsafe impl Sync for TaskRing {}

impl TaskRing {
    pub(super) fn with_size_exp(size_exp: u8) -> TaskRing {
        let capacity = 1usize << size_exp;
        let slots: Box<[Slot]> = (0..capacity)
            .map(|_| Slot {
                mark: AtomicUsize::new(MARK_VACANT),
                task: UnsafeCell::new(None),
            })
            .collect();

        TaskRing {
            reserve_head: AtomicUsize::new(0),
            commit_head: AtomicUsize::new(0),
            request_head: AtomicUsize::new(0),
            release_head: AtomicUsize::new(0),
            slots,
            mask: capacity - 1,
        }
    }

    /// committed tasks not yet claimed by any consumer
    pub(super) fn backlog(&self) -> usize {
        let commit = self.commit_head.load(ORD);
        let request = self.request_head.load(ORD);
        commit.wrapping_sub(request)
    }

    /// Reserves a slot, writes the task, and commits every slot whose write
    /// has finished, in reservation order. Never blocks; a full ring hands
    /// the task back along with the current occupancy.
    pub(super) fn push(&self, task: Task) -> Result<(), ScheduleError> {
        loop {
            let reserve = self.reserve_head.load(ORD);
            let release = self.release_head.load(ORD);

            let outstanding = reserve.wrapping_sub(release);
            if outstanding >= self.mask {
                // one slot is always left unoccupied so a full ring is
                // distinguishable from an empty one
                return Err(ScheduleError::Full {
                    backlog: outstanding,
                    task,
                });
            }

            if self
                .reserve_head
                .compare_exchange(reserve, reserve.wrapping_add(1), ORD, ORD)
                .is_ok()
            {
                let slot = &self.slots[reserve & self.mask];
                assert_ne!(
                    slot.mark.load(ORD),
                    reserve,
                    "reserved a slot that was never released"
                );
                unsafe {
                    *slot.task.get() = Some(task);
                }
                slot.mark.store(reserve, ORD);
                self.commit_ready();
                return Ok(());
            }
            // another producer won the slot; re-read the heads and retry
        }
    }

    /// Claims the oldest committed task, publishes its slot's release mark,
    /// and advances the release head past every fully-released slot. Returns
    /// `None` when nothing is committed.
    pub(super) fn pop(&self) -> Option<Task> {
        loop {
            let request = self.request_head.load(ORD);
            if request == self.commit_head.load(ORD) {
                return None;
            }

            if self
                .request_head
                .compare_exchange(request, request.wrapping_add(1), ORD, ORD)
                .is_ok()
            {
                let slot = &self.slots[request & self.mask];
                let task = unsafe { (*slot.task.get()).take() };
                let task = task.expect("claimed a committed slot with no task in it");
                slot.mark.store(!request, ORD);
                self.release_ready();
                return Some(task);
            }
        }
    }

    /// Advance the commit head over every slot whose producer has finished
    /// writing. Slots commit strictly in reservation index order: a slot
    /// whose mark does not yet equal the commit head stops the sweep, even
    /// if later slots are already written.
    fn commit_ready(&self) {
        loop {
            let commit = self.commit_head.load(ORD);
            if commit == self.reserve_head.load(ORD) {
                break;
            }
            if self.slots[commit & self.mask].mark.load(ORD) != commit {
                break;
            }
            // a lost race just means another thread advanced it; re-read
            let _ = self
                .commit_head
                .compare_exchange(commit, commit.wrapping_add(1), ORD, ORD);
        }
    }

    /// Mirror image of `commit_ready` on the consume side: releases publish
    /// in request index order, so capacity is never overstated while an
    /// earlier claim is still copying its task out.
    fn release_ready(&self) {
        loop {
            let release = self.release_head.load(ORD);
            if release == self.request_head.load(ORD) {
                break;
            }
            if self.slots[release & self.mask].mark.load(ORD) != !release {
                break;
            }
            let _ = self
                .release_head
                .compare_exchange(release, release.wrapping_add(1), ORD, ORD);
        }
    }
}
