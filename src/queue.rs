use core::{
    fmt,
    sync::atomic::Ordering,
};
use std::collections::TryReserveError;

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use crossbeam_utils::{Backoff, CachePadded};
use tracing::{debug, trace};

use crate::config::{Builder, DEFAULT_SEGMENT_CAPACITY};
use crate::segment::Segment;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("segment capacity must be at least 1")]
    ZeroCapacity,
    #[error("failed to allocate the first segment: {0}")]
    Alloc(#[from] TryReserveError),
}

/// Returned by [`FaaQueue::enqueue`] when a new segment could not be allocated. Carries the value
/// that was not enqueued.
pub struct AllocError<T> {
    value: T,
    source: TryReserveError,
}

impl<T> AllocError<T> {
    /// Take back the value that could not be enqueued.
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> fmt::Debug for AllocError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocError")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl<T> fmt::Display for AllocError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to allocate a new segment: {}", self.source)
    }
}

impl<T> std::error::Error for AllocError<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// An unbounded multi-producer multi-consumer FIFO queue.
///
/// Share it between threads by reference (e.g. inside an `Arc`). All operations take `&self` and
/// none of them block.
pub struct FaaQueue<T> {
    head: CachePadded<Atomic<Segment<T>>>,
    tail: CachePadded<Atomic<Segment<T>>>,
    segment_capacity: usize,
}

impl<T> FaaQueue<T> {
    /// Create an empty queue whose segments each hold `segment_capacity` values.
    pub fn new(segment_capacity: usize) -> Result<Self, Error> {
        if segment_capacity == 0 {
            return Err(Error::ZeroCapacity);
        }

        let first = Owned::new(Segment::new(segment_capacity)?);
        let guard = &epoch::pin();
        let first = first.into_shared(guard);

        Ok(Self {
            head: CachePadded::new(Atomic::from(first)),
            tail: CachePadded::new(Atomic::from(first)),
            segment_capacity,
        })
    }

    pub fn builder() -> Builder {
        Builder::new()
    }

    #[inline(always)]
    pub fn segment_capacity(&self) -> usize {
        self.segment_capacity
    }

    /// Append `value` to the back of the queue.
    ///
    /// Never blocks. Fails only if the queue needs a new segment and the allocation fails, in
    /// which case the value is handed back inside the error.
    pub fn enqueue(&self, mut value: T) -> Result<(), AllocError<T>> {
        let guard = &epoch::pin();

        let backoff = Backoff::new();
        loop {
            let tail = self.tail.load(Ordering::Acquire, guard);
            // SAFETY: `tail` is never null, and a segment is only retired once neither `head` nor
            // `tail` points at it. The guard keeps it alive after that.
            let segment = unsafe { tail.deref() };

            let idx = segment.claim_enqueue_slot();
            if idx < self.segment_capacity {
                match segment.try_place(idx, value) {
                    Ok(()) => return Ok(()),
                    Err(rejected) => {
                        // A consumer got to this slot first. The index is lost for good.
                        value = rejected;
                        backoff.spin();
                        continue;
                    }
                }
            }

            // Segment is full. Don't bother growing if someone already has.
            let next = segment.next.load(Ordering::Acquire, guard);
            if !next.is_null() {
                let _ = self.tail.compare_exchange(
                    tail,
                    next,
                    Ordering::Release,
                    Ordering::Relaxed,
                    guard,
                );
                continue;
            }

            let grown = match Segment::seeded(self.segment_capacity, value) {
                Ok(grown) => Owned::new(grown),
                Err((value, source)) => {
                    debug!(
                        segment_capacity = self.segment_capacity,
                        error = %source,
                        "segment allocation failed"
                    );
                    return Err(AllocError { value, source });
                }
            };

            match segment.next.compare_exchange(
                Shared::null(),
                grown,
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            ) {
                Ok(linked) => {
                    // A CAS rather than a plain store keeps `tail` from ever moving backward onto a
                    // segment that `head` has already retired.
                    let _ = self.tail.compare_exchange(
                        tail,
                        linked,
                        Ordering::Release,
                        Ordering::Relaxed,
                        guard,
                    );
                    trace!(segment_capacity = self.segment_capacity, "linked new segment");
                    return Ok(());
                }
                Err(err) => {
                    // The losing segment was never shared, so it can be torn down right here.
                    let unlinked = *err.new.into_box();
                    value = unlinked.into_seed();
                    trace!("lost segment link race");

                    let _ = self.tail.compare_exchange(
                        tail,
                        err.current,
                        Ordering::Release,
                        Ordering::Relaxed,
                        guard,
                    );
                }
            }
        }
    }

    /// Append every value from `values`, stopping at the first allocation failure.
    pub fn enqueue_all<I>(&self, values: I) -> Result<(), AllocError<T>>
    where
        I: IntoIterator<Item = T>,
    {
        for value in values {
            self.enqueue(value)?;
        }
        Ok(())
    }

    /// Remove the value at the front of the queue. Returns `None` immediately when no value is
    /// available.
    pub fn dequeue(&self) -> Option<T> {
        let guard = &epoch::pin();

        let backoff = Backoff::new();
        loop {
            let head = self.head.load(Ordering::Acquire, guard);
            // SAFETY: see `enqueue`.
            let segment = unsafe { head.deref() };

            let idx = segment.claim_dequeue_slot();
            if idx >= self.segment_capacity {
                let next = segment.next.load(Ordering::Acquire, guard);
                if next.is_null() {
                    return None;
                }
                self.advance_head(head, next, guard);
                continue;
            }

            if let Some(value) = segment.take_and_mark_consumed(idx) {
                return Some(value);
            }

            // The producer that owns this index hasn't written yet. It will find the slot
            // consumed and retry elsewhere.
            backoff.spin();
        }
    }

    /// Whether the queue currently holds no values. A snapshot only: other threads may change
    /// the answer before the caller acts on it.
    ///
    /// May move `head` past drained segments as a side effect.
    pub fn is_empty(&self) -> bool {
        let guard = &epoch::pin();

        loop {
            let head = self.head.load(Ordering::Acquire, guard);
            // SAFETY: see `enqueue`.
            let segment = unsafe { head.deref() };

            // `next` must be read before the cursors. Once a successor is visible the enqueue
            // cursor is known to be past capacity, so exhaustion below can only mean every slot
            // has been claimed by a consumer.
            let next = segment.next.load(Ordering::Acquire, guard);
            if !segment.is_exhausted() {
                return false;
            }
            if next.is_null() {
                return true;
            }
            self.advance_head(head, next, guard);
        }
    }

    /// Repeatedly dequeue until the queue reports no value.
    pub fn drain(&self) -> Drain<'_, T> {
        Drain { queue: self }
    }

    fn advance_head<'g>(
        &self,
        head: Shared<'g, Segment<T>>,
        next: Shared<'g, Segment<T>>,
        guard: &'g Guard,
    ) {
        // `tail` must never be left behind on a retired segment.
        if self.tail.load(Ordering::Acquire, guard) == head {
            let _ = self.tail.compare_exchange(
                head,
                next,
                Ordering::Release,
                Ordering::Relaxed,
                guard,
            );
        }

        if self.head
            .compare_exchange(head, next, Ordering::Release, Ordering::Relaxed, guard)
            .is_ok()
        {
            trace!("head moved past drained segment");
            // SAFETY: `head` is now unreachable from both roots. Every one of its slots has been
            // claimed by a consumer, so the deferred drop never touches a live value.
            unsafe {
                guard.defer_destroy(head);
            }
        }
    }
}

/// Panics if the first segment cannot be allocated. Use [`FaaQueue::new`] to handle that case.
impl<T> Default for FaaQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_SEGMENT_CAPACITY)
            .unwrap_or_else(|err| panic!("default queue could not be created: {}", err))
    }
}

impl<T> fmt::Debug for FaaQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaaQueue")
            .field("segment_capacity", &self.segment_capacity)
            .finish_non_exhaustive()
    }
}

impl<T> Drop for FaaQueue<T> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no other thread is inside the queue. Retired segments are
        // behind `head` and owned by the epoch collector, everything from `head` on is ours.
        unsafe {
            let guard = epoch::unprotected();

            let mut freed = 0usize;
            let mut current = self.head.load(Ordering::Relaxed, guard);
            while !current.is_null() {
                let next = current.deref().next.load(Ordering::Relaxed, guard);
                drop(current.into_owned());
                current = next;
                freed += 1;
            }
            trace!(segments = freed, "queue dropped");
        }
    }
}

/// Iterator returned by [`FaaQueue::drain`].
#[derive(Debug)]
pub struct Drain<'a, T> {
    queue: &'a FaaQueue<T>,
}

impl<'a, T> Iterator for Drain<'a, T> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        self.queue.dequeue()
    }
}
