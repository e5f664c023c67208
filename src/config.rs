use crate::queue::{Error, FaaQueue};

/// Number of slots per segment used by [`FaaQueue::default`] and [`Builder::new`].
///
/// Deliberately small so that segment growth is exercised constantly. Workloads that care about
/// throughput should pick a larger value.
pub const DEFAULT_SEGMENT_CAPACITY: usize = 2;

/// Configures a [`FaaQueue`] before it is created. The segment capacity cannot be changed once the
/// queue exists.
#[derive(Debug, Clone)]
pub struct Builder {
    segment_capacity: usize,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            segment_capacity: DEFAULT_SEGMENT_CAPACITY,
        }
    }

    /// Set the number of slots in every segment. Must be at least 1.
    pub fn segment_capacity(mut self, segment_capacity: usize) -> Self {
        self.segment_capacity = segment_capacity;
        self
    }

    pub fn build<T>(self) -> Result<FaaQueue<T>, Error> {
        FaaQueue::new(self.segment_capacity)
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}
