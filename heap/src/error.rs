use thiserror::Error;

/// Errors surfaced by the heap.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
    /// Allocation failed after one collection and at most one growth.
    #[error("out of memory: could not allocate {requested} bytes")]
    OutOfMemory { requested: usize },
    #[error("failed to reserve {size} bytes for a heap slab")]
    Reservation { size: usize },
    #[error("invalid heap settings: {0}")]
    InvalidSettings(&'static str),
    #[error("can't copy a non-contiguous heap")]
    NonContiguousHeap,
    #[error("value is not a context of the expected heap")]
    NotAContext,
    #[error("destination context too small: need {required} bytes, have {available}")]
    DestinationTooSmall { required: usize, available: usize },
    #[error("source and destination are the same heap")]
    SameHeap,
    #[error("global heap already initialized")]
    AlreadyInitialized,
    #[error("global heap not initialized")]
    NotInitialized,
}
