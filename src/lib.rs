//! An unbounded, lock-free, multi-producer multi-consumer FIFO queue that assigns slots with
//! fetch-and-add instead of compare-and-swap loops.
//!
//! The queue is a singly linked, append-only chain of fixed-capacity segments. Producers claim a
//! slot in the tail segment by bumping its enqueue cursor, consumers claim a slot in the head
//! segment by bumping its dequeue cursor. Compare-and-swap is only needed when the chain grows or
//! when `head`/`tail` move on to the next segment, so contention on the hot path stays low.
//!
//! Segments that `head` has moved past are reclaimed with `crossbeam-epoch`.
//!
//! ```
//! let queue = faaq::FaaQueue::new(2).unwrap();
//!
//! for i in 1..=5 {
//!     queue.enqueue(i).unwrap();
//! }
//! assert_eq!(queue.drain().collect::<Vec<_>>(), &[1, 2, 3, 4, 5]);
//! assert!(queue.is_empty());
//! ```
//!
//! The queue is lock-free but not linearizable under every interleaving: a consumer can mark a
//! slot consumed before the producer that claimed it has written its value. The producer then
//! retries further down the chain and the slot is left unused.

pub use config::{
    Builder,
    DEFAULT_SEGMENT_CAPACITY,
};
pub use queue::{
    AllocError,
    Drain,
    Error,
    FaaQueue,
};

mod config;
mod loom_exports;
mod queue;
mod segment;
