use thiserror::Error;

/// Errors that can occur during heap operations
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    /// No free block is large enough for the request
    #[error("Out of memory")]
    OutOfMemory,
    /// The region handed to the heap cannot hold a single block
    #[error("Invalid arena size")]
    InvalidSize,
    /// The pointer does not designate a block of this arena
    #[error("Invalid pointer")]
    InvalidPointer,
    /// The block is already free
    #[error("Double free detected")]
    DoubleFree,
    /// A block header or the free list is inconsistent
    #[error("Heap corrupted")]
    Corrupted,
}

pub type Result<T> = core::result::Result<T, HeapError>;
