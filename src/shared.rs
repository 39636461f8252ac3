//! Interrupt-safe shared buffers.
//!
//! The host fills advertising data in thread mode while the link layer releases
//! buffers from its interrupt handler. Both go through a critical section.
//!
//! ```rust
//! use advmem::{SharedAdvBuffers, advbuf::{AdvHandle, DataType}};
//!
//! static BUFFERS: SharedAdvBuffers = SharedAdvBuffers::new();
//!
//! let region = Box::leak(Box::new([0u8; 1024]));
//! BUFFERS.init(region).unwrap();
//!
//! let handle = AdvHandle::new(0).unwrap();
//! let pending = BUFFERS
//!     .with(|buffers| {
//!         buffers.alloc(handle, DataType::Adv, 31, false)?;
//!         Ok::<_, advmem::advbuf::AdvBufferError>(buffers.is_next_pending(handle, DataType::Adv))
//!     })
//!     .unwrap();
//! assert_eq!(pending, Ok(true));
//! ```

use advbuf::{AdvBufferError, AdvBuffers, config::NUM_ADV_SETS};
use core::cell::RefCell;
use critical_section::Mutex;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SharedError {
    #[error("Advertising buffers already initialized")]
    AlreadyInit,
    #[error("Advertising buffers not initialized")]
    NotInitialized,
    /// Reentrant access from within [`SharedAdvBuffers::with`].
    #[error("Advertising buffers already in use")]
    Busy,
    #[error("Buffer error: {0}")]
    Buffers(#[from] AdvBufferError),
}

/// Advertising buffers behind a critical section.
pub struct SharedAdvBuffers<const SETS: usize = NUM_ADV_SETS> {
    inner: Mutex<RefCell<Option<AdvBuffers<'static, SETS>>>>,
}

impl<const SETS: usize> Default for SharedAdvBuffers<SETS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const SETS: usize> SharedAdvBuffers<SETS> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(None)),
        }
    }

    /// Build the buffers over `region`.
    ///
    /// # Errors
    ///
    /// - `SharedError::AlreadyInit` if called more than once. `region` is not used.
    /// - `SharedError::Buffers` if `region` cannot host a heap.
    pub fn init(&self, region: &'static mut [u8]) -> Result<(), SharedError> {
        critical_section::with(|cs| {
            let mut inner = self
                .inner
                .borrow(cs)
                .try_borrow_mut()
                .map_err(|_| SharedError::Busy)?;
            if inner.is_some() {
                log::warn!("advmem: advertising buffers initialized twice");
                return Err(SharedError::AlreadyInit);
            }

            let size = region.len();
            *inner = Some(AdvBuffers::new(region)?);
            log::debug!("advmem: advertising buffers ready, {size} bytes");
            Ok(())
        })
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        critical_section::with(|cs| {
            self.inner
                .borrow(cs)
                .try_borrow()
                .is_ok_and(|inner| inner.is_some())
        })
    }

    /// Run `f` on the buffers, inside a critical section.
    ///
    /// `f` should be short: interrupts are masked while it runs.
    ///
    /// # Errors
    ///
    /// - `SharedError::NotInitialized` before [`init`](Self::init)
    /// - `SharedError::Busy` if called from within `f`
    pub fn with<R>(
        &self,
        f: impl FnOnce(&mut AdvBuffers<'static, SETS>) -> R,
    ) -> Result<R, SharedError> {
        critical_section::with(|cs| {
            let mut inner = self
                .inner
                .borrow(cs)
                .try_borrow_mut()
                .map_err(|_| SharedError::Busy)?;
            inner.as_mut().map(f).ok_or(SharedError::NotInitialized)
        })
    }
}
