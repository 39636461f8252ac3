//! # advbuf: advertising data buffers
//!
//! Advertising, scan response and periodic advertising data are read by the
//! link layer asynchronously, while the host may already be preparing the next
//! payload. `advbuf` keeps up to three buffers per advertising set and data type:
//!
//! - `next`: being written by the host, not visible to the link layer
//! - `current`: handed to the link layer
//! - `old`: replaced, but possibly still read until the link layer releases it
//!
//! Buffers come from a [`dmheap::BestFitHeap`] owned by [`AdvBuffers`]. Small
//! fixed-size payloads (legacy advertising, PAwR) use the bitmask pools of
//! [`pool`] instead.
//!
//! ## Usage
//!
//! ```rust
//! use advbuf::{AdvBuffers, AdvHandle, DataType, FreedOld};
//!
//! let mut arena = [0u32; 256];
//! // SAFETY: `u32` has no invalid bit patterns
//! let region = unsafe {
//!     core::slice::from_raw_parts_mut(arena.as_mut_ptr().cast::<u8>(), 1024)
//! };
//! let mut buffers: AdvBuffers = AdvBuffers::new(region).unwrap();
//! let handle = AdvHandle::new(5).unwrap();
//!
//! let data = buffers.alloc(handle, DataType::Adv, 20, false).unwrap();
//! buffers.activate_next(handle, DataType::Adv).unwrap();
//!
//! // Later, once new data has been activated
//! buffers.deactivate_current(handle, DataType::Adv).unwrap();
//! let freed = buffers.free_old(data.buffer.unwrap()).unwrap();
//! assert!(matches!(freed, FreedOld::Old { .. }));
//! assert_eq!(buffers.heap().stats().free_bytes, 1024);
//! ```
#![cfg_attr(not(test), no_std)]
#![warn(clippy::pedantic, clippy::nursery)]
#![forbid(unsafe_op_in_unsafe_fn)]

pub mod config;
mod error;
mod manager;
pub mod pool;
mod slot;
mod types;
pub mod update;

pub use error::{AdvBufferError, Result};
pub use manager::{AdvBuffers, Allocation, FreedOld, Outcome};
pub use slot::{Slot, SlotKind, SlotState, SlotTable};
pub use types::{AdvHandle, Buffer, DataType};
