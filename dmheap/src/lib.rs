//! # dmheap: best-fit heap over a fixed arena
//!
//! `dmheap` manages one statically sized, contiguous memory region for firmware
//! that cannot rely on a global allocator. It is small on purpose: a single free
//! list, no size classes, no locking.
//!
//! ## Design
//!
//! - **Best fit**: the smallest free block that can hold the request is used.
//!   Among equally sized candidates the lowest address wins, so a given
//!   history of calls always produces the same layout.
//! - **Splitting**: the tail of a block is given back to the free list only when
//!   it is larger than three block headers. Smaller excesses stay with the
//!   allocation.
//! - **Coalescing**: the free list is sorted by address and a freed block is
//!   merged with its free neighbours immediately.
//! - **Fallible by value**: exhaustion is reported as `HeapError::OutOfMemory`.
//!   A failed `realloc` leaves the original block allocated.
//!
//! ## Usage
//!
//! ```rust
//! use dmheap::BestFitHeap;
//!
//! let mut arena = [0u32; 256];
//! // SAFETY: `u32` has no invalid bit patterns
//! let region = unsafe {
//!     core::slice::from_raw_parts_mut(arena.as_mut_ptr().cast::<u8>(), 1024)
//! };
//! let mut heap = BestFitHeap::new(region).unwrap();
//!
//! let ptr = heap.alloc(20).unwrap();
//! let ptr = unsafe { heap.realloc(ptr, 40) }.unwrap();
//!
//! unsafe { heap.free(ptr) }.unwrap();
//! assert_eq!(heap.stats().free_bytes, 1024);
//! ```
#![cfg_attr(not(test), no_std)]
#![warn(clippy::pedantic, clippy::nursery)]
#![forbid(unsafe_op_in_unsafe_fn)]

mod error;
mod heap;
mod utils;

pub use error::{HeapError, Result};
pub use heap::{
    ALIGN, BestFitHeap, FreeBlock, FreeBlocks, HEADER_SIZE, HeapStats, MIN_BLOCK_SIZE,
    SLACK_THRESHOLD,
};
