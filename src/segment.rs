use core::{
    mem::MaybeUninit,
    sync::atomic::Ordering,
};
use std::collections::TryReserveError;

use crossbeam_epoch::Atomic;
use crossbeam_utils::CachePadded;

use crate::loom_exports::{
    cell::UnsafeCell,
    sync::atomic::{AtomicU8, AtomicUsize},
};

// Slot states. A slot only moves forward through these, except that a consumer may jump any slot
// straight to CONSUMED.
const EMPTY: u8 = 0;
// The producer that won EMPTY -> WRITING owns the cell until it publishes FILLED.
const WRITING: u8 = 1;
const FILLED: u8 = 2;
const CONSUMED: u8 = 3;

struct Slot<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    fn empty() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    fn filled(value: T) -> Self {
        Self {
            state: AtomicU8::new(FILLED),
            value: UnsafeCell::new(MaybeUninit::new(value)),
        }
    }

    fn try_place(&self, value: T) -> Result<(), T> {
        if self.state
            .compare_exchange(EMPTY, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(value);
        }

        // SAFETY: WRITING is only ever entered by the single winner of the exchange above, and
        // consumers never touch the cell unless they observe FILLED.
        self.value.with_mut(|cell| unsafe { (*cell).write(value); });

        // Publishes the write to the consumer that swaps FILLED out.
        match self.state.compare_exchange(WRITING, FILLED, Ordering::Release, Ordering::Relaxed) {
            Ok(_) => Ok(()),
            // A consumer marked the slot consumed mid-write. It saw WRITING, so it left the value
            // where it is and it is still ours to take back.
            Err(_) => Err(self.value.with_mut(|cell| unsafe { (*cell).assume_init_read() })),
        }
    }

    fn take(&self) -> Option<T> {
        match self.state.swap(CONSUMED, Ordering::AcqRel) {
            // SAFETY: the value was published by the Release in `try_place` (or the slot was
            // seeded before the segment was shared), and only one swap can ever observe FILLED.
            FILLED => Some(self.value.with_mut(|cell| unsafe { (*cell).assume_init_read() })),
            _ => None,
        }
    }
}

impl<T> Drop for Slot<T> {
    fn drop(&mut self) {
        if self.state.load(Ordering::Relaxed) == FILLED {
            // SAFETY: FILLED slots hold an initialized value nobody has taken.
            self.value.with_mut(|cell| unsafe { (*cell).assume_init_drop() });
        }
    }
}

/// A fixed-capacity node in the queue's chain.
///
/// Both cursors only ever grow. An index handed out by a cursor is used at most once; indices at
/// or past the capacity mean "go to the next segment".
pub(crate) struct Segment<T> {
    enq_idx: CachePadded<AtomicUsize>,
    deq_idx: CachePadded<AtomicUsize>,
    pub(crate) next: Atomic<Segment<T>>,
    slots: Box<[Slot<T>]>,
}

impl<T> Segment<T> {
    /// The first segment of a queue: every slot empty, both cursors at zero.
    pub(crate) fn new(capacity: usize) -> Result<Self, TryReserveError> {
        let mut slots = reserve_slots(capacity)?;
        slots.extend((0..capacity).map(|_| Slot::empty()));

        Ok(Self::from_slots(slots, 0))
    }

    /// A grown segment. `value` already sits in slot 0, so the producer that grows the chain never
    /// contends for its own slot.
    ///
    /// On allocation failure the value is handed back along with the error.
    pub(crate) fn seeded(capacity: usize, value: T) -> Result<Self, (T, TryReserveError)> {
        debug_assert!(capacity > 0);

        let mut slots = match reserve_slots(capacity) {
            Ok(slots) => slots,
            Err(err) => return Err((value, err)),
        };
        slots.push(Slot::filled(value));
        slots.extend((1..capacity).map(|_| Slot::empty()));

        Ok(Self::from_slots(slots, 1))
    }

    fn from_slots(slots: Vec<Slot<T>>, enq_idx: usize) -> Self {
        Self {
            enq_idx: CachePadded::new(AtomicUsize::new(enq_idx)),
            deq_idx: CachePadded::new(AtomicUsize::new(0)),
            next: Atomic::null(),
            slots: slots.into_boxed_slice(),
        }
    }

    /// Recover the seed of a segment that was never linked into a chain.
    pub(crate) fn into_seed(self) -> T {
        // Nobody else ever saw this segment, so slot 0 still holds the seed.
        match self.take_and_mark_consumed(0) {
            Some(value) => value,
            None => unreachable!("unlinked segment lost its seed"),
        }
    }

    #[inline(always)]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline(always)]
    pub(crate) fn claim_enqueue_slot(&self) -> usize {
        self.enq_idx.fetch_add(1, Ordering::AcqRel)
    }

    /// Place `value` at `index` if that slot is still empty. Fails, returning the value, if a
    /// consumer already marked the slot consumed.
    #[inline(always)]
    pub(crate) fn try_place(&self, index: usize, value: T) -> Result<(), T> {
        self.slots[index].try_place(value)
    }

    #[inline(always)]
    pub(crate) fn claim_dequeue_slot(&self) -> usize {
        self.deq_idx.fetch_add(1, Ordering::AcqRel)
    }

    /// Unconditionally mark the slot at `index` consumed, returning the value it held, if any.
    /// Marking a slot before its producer gets to it makes that producer's placement fail.
    #[inline(always)]
    pub(crate) fn take_and_mark_consumed(&self, index: usize) -> Option<T> {
        self.slots[index].take()
    }

    /// True when every index a consumer could still claim here is unfilled for good or already
    /// claimed.
    pub(crate) fn is_exhausted(&self) -> bool {
        let deq_idx = self.deq_idx.load(Ordering::Acquire);
        deq_idx >= self.enq_idx.load(Ordering::Acquire) || deq_idx >= self.capacity()
    }
}

fn reserve_slots<T>(capacity: usize) -> Result<Vec<Slot<T>>, TryReserveError> {
    let mut slots = Vec::new();
    slots.try_reserve_exact(capacity)?;
    Ok(slots)
}

unsafe impl<T: Send> Send for Segment<T> { }
unsafe impl<T: Send> Sync for Segment<T> { }
