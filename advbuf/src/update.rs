//! Fragmented advertising data updates.
//!
//! Extended advertising data arrives in fragments, each tagged with an
//! [`Operation`]. Fragments are accumulated into the `next` buffer, which is
//! handed to the link layer once complete, and the previous buffer is retired.

use crate::{
    config::MAX_ADV_DATA_LENGTH,
    error::AdvBufferError,
    manager::AdvBuffers,
    types::{AdvHandle, DataType},
};
use core::ptr::NonNull;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
/// Position of a fragment in the advertising data.
pub enum Operation {
    Intermediate = 0x00,
    First = 0x01,
    Last = 0x02,
    Complete = 0x03,
    /// Keep the data, only refresh the Advertising DID.
    Unchanged = 0x04,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Link layer rejected the data (status {0:#04x})")]
/// Status code returned by the link layer.
pub struct LinkError(pub u8);

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum UpdateError {
    #[error("Memory capacity exceeded")]
    CapacityExceeded,
    #[error("Buffer error: {0}")]
    Buffers(#[from] AdvBufferError),
    #[error("Link error: {0}")]
    Link(#[from] LinkError),
}

/// Data path of the link layer.
pub trait LinkLayer {
    /// Hand over the data to advertise, `None` meaning no data.
    ///
    /// # Errors
    ///
    /// Returns the link layer status if the data is refused.
    fn set_data(
        &mut self,
        handle: AdvHandle,
        data_type: DataType,
        data: Option<(NonNull<u8>, usize)>,
    ) -> Result<(), LinkError>;
}

/// Apply one data fragment.
///
/// # Errors
///
/// - `UpdateError::CapacityExceeded` if the buffer cannot hold the data. The
///   link layer is left without data and the pending buffer is dropped.
/// - `UpdateError::Link` if the link layer refused the complete data. The
///   pending buffer is dropped and the previous data stays in place.
/// - `UpdateError::Buffers` if `handle` has no data to forward for
///   `Operation::Unchanged`, or on an inconsistent slot.
pub fn set_data<L: LinkLayer, const SETS: usize>(
    buffers: &mut AdvBuffers<'_, SETS>,
    link: &mut L,
    handle: AdvHandle,
    data_type: DataType,
    operation: Operation,
    payload: &[u8],
) -> Result<(), UpdateError> {
    let extend = match operation {
        Operation::Unchanged => {
            let state = buffers
                .state(handle, data_type)
                .ok_or(AdvBufferError::UnknownHandle)?;
            let current = state.current().map(|buffer| (buffer.ptr, buffer.len));
            return link.set_data(handle, data_type, current).map_err(Into::into);
        }
        Operation::First | Operation::Complete => {
            // The slot is claimed by the allocation below if missing
            match buffers.free_next(handle, data_type) {
                Ok(_) | Err(AdvBufferError::UnknownHandle) => {}
                Err(err) => return Err(err.into()),
            }
            false
        }
        Operation::Intermediate | Operation::Last => true,
    };

    let allocation = match buffers.alloc(handle, data_type, payload.len(), extend) {
        Ok(allocation) if allocation.len <= MAX_ADV_DATA_LENGTH => allocation,
        result => {
            log::debug!(
                "advbuf: {operation:?} fragment of {} bytes for handle {} does not fit ({:?})",
                payload.len(),
                handle.get(),
                result.map(|allocation| allocation.len)
            );
            cancel(buffers, link, handle, data_type);
            return Err(UpdateError::CapacityExceeded);
        }
    };

    if let Some(ptr) = allocation.buffer {
        // SAFETY: The buffer holds `allocation.len` bytes, the fragment goes
        // after the `old_len` bytes already received.
        unsafe {
            core::ptr::copy_nonoverlapping(
                payload.as_ptr(),
                ptr.as_ptr().add(allocation.old_len),
                payload.len(),
            );
        }
    }

    match operation {
        Operation::Last | Operation::Complete => {
            let data = allocation.buffer.map(|ptr| (ptr, allocation.len));
            if let Err(err) = link.set_data(handle, data_type, data) {
                log::debug!("advbuf: data of handle {} refused: {err}", handle.get());
                buffers.free_next(handle, data_type)?;
                return Err(err.into());
            }
            buffers.deactivate_current(handle, data_type)?;
            buffers.activate_next(handle, data_type)?;
        }
        Operation::First => {
            // Nothing is advertised until the last fragment
            if let Err(err) = link.set_data(handle, data_type, None) {
                log::debug!("advbuf: cannot clear data of handle {}: {err}", handle.get());
            }
            buffers.deactivate_current(handle, data_type)?;
        }
        Operation::Intermediate | Operation::Unchanged => {}
    }
    Ok(())
}

fn cancel<L: LinkLayer, const SETS: usize>(
    buffers: &mut AdvBuffers<'_, SETS>,
    link: &mut L,
    handle: AdvHandle,
    data_type: DataType,
) {
    if let Err(err) = link.set_data(handle, data_type, None) {
        log::debug!("advbuf: cannot clear data of handle {}: {err}", handle.get());
    }
    if let Err(err) = buffers.deactivate_current(handle, data_type) {
        log::debug!("advbuf: current data of handle {} kept: {err}", handle.get());
    }
    if let Err(err) = buffers.free_next(handle, data_type) {
        log::debug!("advbuf: pending data of handle {} kept: {err}", handle.get());
    }
}
