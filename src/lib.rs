//! # advmem
//!
//! Memory core for the advertising data of a BLE controller:
//!
//! - [`dmheap`]: best-fit heap over a fixed arena
//! - [`advbuf`]: old/current/next buffers per advertising set, fixed pools and
//!   fragmented data updates
//! - [`shared`]: a process-wide instance usable from interrupt handlers
//!
//! Neither [`dmheap`] nor [`advbuf`] lock anything. Code sharing an instance
//! between thread mode and interrupts goes through [`SharedAdvBuffers`].
#![cfg_attr(not(test), no_std)]
#![warn(clippy::pedantic, clippy::nursery)]
#![forbid(unsafe_op_in_unsafe_fn)]

pub use advbuf;
pub use dmheap;

pub mod shared;

pub use shared::{SharedAdvBuffers, SharedError};
