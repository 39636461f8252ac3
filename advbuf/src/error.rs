use dmheap::HeapError;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
/// An error that can occur when managing advertising buffers.
pub enum AdvBufferError {
    #[error("Invalid advertising handle {0:#04x}")]
    InvalidHandle(u8),
    #[error("Invalid advertising data type {0}")]
    InvalidDataType(u8),
    #[error("No buffer slot for this advertising handle")]
    UnknownHandle,
    #[error("No free buffer slot")]
    NoFreeSlot,
    #[error("Old buffer not released yet")]
    OldPending,
    #[error("Current buffer still in use")]
    CurrentActive,
    #[error("No pending buffer to extend")]
    NoPendingNext,
    #[error("Buffer not owned by any slot")]
    UnknownBuffer,
    #[error("Invalid pool size {0}")]
    InvalidPoolSize(usize),
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Heap error: {0}")]
    Heap(#[from] HeapError),
}

impl AdvBufferError {
    /// Map an allocator failure, keeping exhaustion distinct from corruption.
    #[must_use]
    pub const fn from_alloc(error: HeapError) -> Self {
        match error {
            HeapError::OutOfMemory => Self::OutOfMemory,
            other => Self::Heap(other),
        }
    }
}

pub type Result<T> = core::result::Result<T, AdvBufferError>;
