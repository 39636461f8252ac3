//! Buffer lifecycle manager.
//!
//! The host prepares a `next` buffer, activates it once the link layer accepted
//! it, and retires the previous `current` buffer into `old`. The `old` buffer is
//! only released when the link layer confirms it stopped reading it, through
//! [`AdvBuffers::free_old`] or [`AdvBuffers::on_data_update`].

use crate::{
    config::NUM_ADV_SETS,
    error::{AdvBufferError, Result},
    slot::{Slot, SlotKind, SlotState, SlotTable},
    types::{AdvHandle, Buffer, DataType},
};
use core::ptr::NonNull;
use dmheap::{BestFitHeap, HeapError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Result of [`AdvBuffers::alloc`].
pub struct Allocation {
    /// The `next` buffer, `None` for a zero-length request.
    pub buffer: Option<NonNull<u8>>,
    /// Total length of the `next` buffer.
    pub len: usize,
    /// Length before the call, where newly appended data starts.
    pub old_len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Result of a state transition, with the resulting slot shape.
pub enum Outcome {
    Applied(SlotKind),
    /// There was nothing to do.
    NoOp(SlotKind),
}

impl Outcome {
    #[must_use]
    pub const fn kind(self) -> SlotKind {
        match self {
            Self::Applied(kind) | Self::NoOp(kind) => kind,
        }
    }

    #[must_use]
    pub const fn is_applied(self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// What [`AdvBuffers::free_old`] released.
pub enum FreedOld {
    /// The `old` buffer of the slot.
    Old {
        handle: AdvHandle,
        data_type: DataType,
    },
    /// The pointer was the `current` buffer: the slot was released. Its `old`
    /// buffer, if any, stays allocated until it is released in turn.
    TornDown {
        handle: AdvHandle,
        data_type: DataType,
    },
    /// The `old` buffer left behind by a torn down slot.
    Parked { data_type: DataType },
}

/// Advertising data buffers of every advertising set.
pub struct AdvBuffers<'a, const SETS: usize = NUM_ADV_SETS> {
    heap: BestFitHeap<'a>,
    table: SlotTable<SETS>,
}

// SAFETY: Every buffer referenced by the table lives in the heap's arena, which
// is exclusively borrowed by the heap.
unsafe impl<const SETS: usize> Send for AdvBuffers<'_, SETS> {}

impl<'a, const SETS: usize> AdvBuffers<'a, SETS> {
    /// Build the manager over `region`, with an empty slot table.
    ///
    /// # Errors
    ///
    /// - `AdvBufferError::Heap(HeapError::InvalidSize)` if the region cannot host a heap.
    pub fn new(region: &'a mut [u8]) -> Result<Self> {
        Ok(Self {
            heap: BestFitHeap::new(region)?,
            table: SlotTable::new(),
        })
    }

    #[must_use]
    #[inline]
    pub const fn heap(&self) -> &BestFitHeap<'a> {
        &self.heap
    }

    #[must_use]
    #[inline]
    pub const fn table(&self) -> &SlotTable<SETS> {
        &self.table
    }

    #[must_use]
    pub fn state(&self, handle: AdvHandle, data_type: DataType) -> Option<SlotState> {
        self.table.find(handle, data_type).map(Slot::state)
    }

    #[must_use]
    pub fn is_next_pending(&self, handle: AdvHandle, data_type: DataType) -> bool {
        self.state(handle, data_type)
            .is_some_and(|state| state.next().is_some())
    }

    /// Allocate, or grow, the `next` buffer of a slot.
    ///
    /// A slot is claimed for `handle` if it does not own one yet. With
    /// `extend == false`, a previous `next` buffer is dropped and `length` bytes
    /// are allocated, a zero `length` leaving the slot without `next`. With
    /// `extend == true`, the existing `next` buffer grows by `length` bytes and
    /// its contents are kept.
    ///
    /// # Errors
    ///
    /// - `AdvBufferError::NoFreeSlot` if the table is full for `data_type`
    /// - `AdvBufferError::OldPending` for a new buffer while `old` is not released
    /// - `AdvBufferError::NoPendingNext` when extending without a `next` buffer
    /// - `AdvBufferError::OutOfMemory` if the heap is exhausted. `next` is dropped.
    pub fn alloc(
        &mut self,
        handle: AdvHandle,
        data_type: DataType,
        length: usize,
        extend: bool,
    ) -> Result<Allocation> {
        let claimed = if self.table.find(handle, data_type).is_some() {
            false
        } else if self.table.claim(handle, data_type).is_some() {
            log::trace!("advbuf: slot claimed for handle {} ({data_type:?})", handle.get());
            true
        } else {
            log::debug!("advbuf: no free {data_type:?} slot for handle {}", handle.get());
            return Err(AdvBufferError::NoFreeSlot);
        };

        let result = if extend {
            self.extend_next(handle, data_type, length)
        } else {
            self.replace_next(handle, data_type, length)
        };

        if result.is_err()
            && claimed
            && let Some(slot) = self.table.find_mut(handle, data_type)
            && slot.state() == SlotState::Empty
        {
            slot.reset();
        }
        result
    }

    fn replace_next(
        &mut self,
        handle: AdvHandle,
        data_type: DataType,
        length: usize,
    ) -> Result<Allocation> {
        let slot = Self::lookup(&mut self.table, handle, data_type)?;
        let state = slot.state();

        if state.old().is_some() {
            log::debug!(
                "advbuf: new data for handle {} ({data_type:?}) rejected, old buffer pending",
                handle.get()
            );
            return Err(AdvBufferError::OldPending);
        }

        if let Some(next) = state.next() {
            // SAFETY: `next` was allocated from this heap and only the slot owns it
            unsafe { self.heap.free(next.ptr) }?;
            slot.set_state(state.with_next(None));
        }

        if length == 0 {
            return Ok(Allocation {
                buffer: None,
                len: 0,
                old_len: 0,
            });
        }

        let ptr = self.heap.alloc(length).map_err(|err| {
            log::debug!("advbuf: cannot allocate {length} bytes for handle {}", handle.get());
            AdvBufferError::from_alloc(err)
        })?;
        slot.set_state(slot.state().with_next(Some(Buffer::new(ptr, length))));

        log::trace!("advbuf: next buffer {ptr:p} of {length} bytes for handle {}", handle.get());
        Ok(Allocation {
            buffer: Some(ptr),
            len: length,
            old_len: 0,
        })
    }

    fn extend_next(
        &mut self,
        handle: AdvHandle,
        data_type: DataType,
        length: usize,
    ) -> Result<Allocation> {
        let slot = Self::lookup(&mut self.table, handle, data_type)?;
        let state = slot.state();

        let Some(next) = state.next() else {
            log::debug!("advbuf: nothing to extend for handle {} ({data_type:?})", handle.get());
            return Err(AdvBufferError::NoPendingNext);
        };

        let grown = match next.len.checked_add(length) {
            // SAFETY: `next` was allocated from this heap and only the slot owns it.
            // The slot is updated with the returned pointer right away.
            Some(new_len) => {
                unsafe { self.heap.realloc(next.ptr, new_len) }.map(|ptr| (ptr, new_len))
            }
            None => Err(HeapError::OutOfMemory),
        };

        match grown {
            Ok((ptr, new_len)) => {
                slot.set_state(state.with_next(Some(Buffer::new(ptr, new_len))));
                log::trace!(
                    "advbuf: next buffer of handle {} grown to {new_len} bytes",
                    handle.get()
                );
                Ok(Allocation {
                    buffer: Some(ptr),
                    len: new_len,
                    old_len: next.len,
                })
            }
            Err(err) => {
                log::debug!(
                    "advbuf: cannot grow next buffer of handle {} by {length} bytes",
                    handle.get()
                );
                slot.set_state(state.with_next(None));
                // SAFETY: A failed realloc leaves `next` allocated, and the slot
                // does not reference it anymore.
                unsafe { self.heap.free(next.ptr) }?;
                Err(AdvBufferError::from_alloc(err))
            }
        }
    }

    /// Free the `current` buffer.
    ///
    /// # Safety
    ///
    /// The link layer must not be reading the `current` buffer anymore.
    ///
    /// # Errors
    ///
    /// - `AdvBufferError::UnknownHandle` if no slot is assigned to `handle`
    pub unsafe fn free_current(
        &mut self,
        handle: AdvHandle,
        data_type: DataType,
    ) -> Result<Outcome> {
        let slot = Self::lookup(&mut self.table, handle, data_type)?;
        let state = slot.state();

        let Some(current) = state.current() else {
            return Ok(Outcome::NoOp(state.kind()));
        };
        // SAFETY: `current` was allocated from this heap and the caller
        // guarantees it is not in use.
        unsafe { self.heap.free(current.ptr) }?;
        let state = state.with_current(None);
        slot.set_state(state);

        log::trace!("advbuf: current buffer of handle {} freed", handle.get());
        Ok(Outcome::Applied(state.kind()))
    }

    /// Free the `next` buffer.
    ///
    /// # Errors
    ///
    /// - `AdvBufferError::UnknownHandle` if no slot is assigned to `handle`
    pub fn free_next(&mut self, handle: AdvHandle, data_type: DataType) -> Result<Outcome> {
        let slot = Self::lookup(&mut self.table, handle, data_type)?;
        let state = slot.state();

        let Some(next) = state.next() else {
            return Ok(Outcome::NoOp(state.kind()));
        };
        // SAFETY: `next` was allocated from this heap and is never shared with
        // the link layer before activation.
        unsafe { self.heap.free(next.ptr) }?;
        let state = state.with_next(None);
        slot.set_state(state);

        log::trace!("advbuf: next buffer of handle {} freed", handle.get());
        Ok(Outcome::Applied(state.kind()))
    }

    /// Promote `next` to `current`.
    ///
    /// # Errors
    ///
    /// - `AdvBufferError::UnknownHandle` if no slot is assigned to `handle`
    /// - `AdvBufferError::CurrentActive` if `current` must be deactivated first
    pub fn activate_next(&mut self, handle: AdvHandle, data_type: DataType) -> Result<Outcome> {
        let slot = Self::lookup(&mut self.table, handle, data_type)?;
        let state = slot.state();

        let Some(next) = state.next() else {
            return Ok(Outcome::NoOp(state.kind()));
        };
        if state.current().is_some() {
            log::warn!(
                "advbuf: activation for handle {} ({data_type:?}) would drop the current buffer",
                handle.get()
            );
            return Err(AdvBufferError::CurrentActive);
        }

        let state = state.with_current(Some(next)).with_next(None);
        slot.set_state(state);

        log::trace!("advbuf: buffer {:p} now current for handle {}", next.ptr, handle.get());
        Ok(Outcome::Applied(state.kind()))
    }

    /// Retire `current` into `old`.
    ///
    /// # Errors
    ///
    /// - `AdvBufferError::UnknownHandle` if no slot is assigned to `handle`
    /// - `AdvBufferError::OldPending` if the previous `old` buffer is not released
    pub fn deactivate_current(
        &mut self,
        handle: AdvHandle,
        data_type: DataType,
    ) -> Result<Outcome> {
        let slot = Self::lookup(&mut self.table, handle, data_type)?;
        let state = slot.state();

        let Some(current) = state.current() else {
            return Ok(Outcome::NoOp(state.kind()));
        };
        if state.old().is_some() {
            log::warn!(
                "advbuf: deactivation for handle {} ({data_type:?}) would drop the old buffer",
                handle.get()
            );
            return Err(AdvBufferError::OldPending);
        }

        let state = state.with_old(Some(current)).with_current(None);
        slot.set_state(state);

        log::trace!("advbuf: buffer {:p} retired for handle {}", current.ptr, handle.get());
        Ok(Outcome::Applied(state.kind()))
    }

    /// Release a buffer the link layer stopped using.
    ///
    /// Slots are scanned data type first, then set by set. If `ptr` is the `old`
    /// buffer of a slot, it is freed, whether the slot is still owned or was
    /// torn down. If it is the `current` buffer, the advertising set is gone:
    /// `current` and `next` are freed and the slot is released, while `old`
    /// stays parked in it until the link layer releases it too.
    ///
    /// # Errors
    ///
    /// - `AdvBufferError::UnknownBuffer` if no slot references `ptr`
    pub fn free_old(&mut self, ptr: NonNull<u8>) -> Result<FreedOld> {
        for data_type in DataType::ALL {
            for slot in self.table.slots_mut(data_type) {
                let state = slot.state();

                if state.old().is_some_and(|old| old.ptr == ptr) {
                    // SAFETY: The link layer confirmed it does not read `old` anymore
                    unsafe { self.heap.free(ptr) }?;
                    slot.set_state(state.with_old(None));
                    log::trace!("advbuf: old buffer {ptr:p} freed");
                    return Ok(match slot.handle() {
                        Some(handle) => FreedOld::Old { handle, data_type },
                        None => FreedOld::Parked { data_type },
                    });
                }

                let Some(handle) = slot.handle() else {
                    continue;
                };
                if state.current().is_some_and(|current| current.ptr == ptr) {
                    Self::tear_down(&mut self.heap, slot)?;
                    log::debug!(
                        "advbuf: handle {} ({data_type:?}) torn down on release of {ptr:p}",
                        handle.get()
                    );
                    return Ok(FreedOld::TornDown { handle, data_type });
                }
            }
        }

        log::warn!("advbuf: released buffer {ptr:p} is not owned by any slot");
        Err(AdvBufferError::UnknownBuffer)
    }

    /// Link layer notification: the buffer in use switched from `old` to `new`.
    ///
    /// # Errors
    ///
    /// See [`free_old`](Self::free_old).
    pub fn on_data_update(
        &mut self,
        old: Option<NonNull<u8>>,
        new: Option<NonNull<u8>>,
    ) -> Result<Option<FreedOld>> {
        match old {
            Some(old) if Some(old) != new => self.free_old(old).map(Some),
            _ => Ok(None),
        }
    }

    /// Free every buffer of a slot and give the slot back to the table.
    ///
    /// Returns the shape of the slot before it was released.
    ///
    /// # Safety
    ///
    /// The link layer must not be reading any buffer of the slot anymore.
    ///
    /// # Errors
    ///
    /// - `AdvBufferError::UnknownHandle` if no slot is assigned to `handle`
    pub unsafe fn release(&mut self, handle: AdvHandle, data_type: DataType) -> Result<SlotKind> {
        let slot = Self::lookup(&mut self.table, handle, data_type)?;
        let kind = slot.state().kind();
        Self::release_slot(&mut self.heap, slot)?;
        log::trace!("advbuf: handle {} ({data_type:?}) released", handle.get());
        Ok(kind)
    }

    fn release_slot(heap: &mut BestFitHeap<'a>, slot: &mut Slot) -> Result<()> {
        let (old, current, next) = slot.state().parts();
        slot.reset();
        Self::free_all(heap, [old, current, next])
    }

    /// Release a slot whose `current` buffer the link layer gave back.
    fn tear_down(heap: &mut BestFitHeap<'a>, slot: &mut Slot) -> Result<()> {
        let (_, current, next) = slot.state().parts();
        slot.park();
        Self::free_all(heap, [current, next])
    }

    fn free_all<const N: usize>(
        heap: &mut BestFitHeap<'a>,
        buffers: [Option<Buffer>; N],
    ) -> Result<()> {
        let mut first_error = None;
        for buffer in buffers.into_iter().flatten() {
            // SAFETY: The slot owned the buffer and just forgot it
            if let Err(err) = unsafe { heap.free(buffer.ptr) } {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), |err| Err(err.into()))
    }

    fn lookup(
        table: &mut SlotTable<SETS>,
        handle: AdvHandle,
        data_type: DataType,
    ) -> Result<&mut Slot> {
        table.find_mut(handle, data_type).ok_or_else(|| {
            log::debug!("advbuf: no {data_type:?} slot for handle {}", handle.get());
            AdvBufferError::UnknownHandle
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmheap::HEADER_SIZE;

    #[repr(align(8))]
    struct Arena<const N: usize>([u8; N]);

    impl<const N: usize> Arena<N> {
        const fn new() -> Self {
            Self([0; N])
        }
    }

    fn h(raw: u8) -> AdvHandle {
        AdvHandle::new(raw).unwrap()
    }

    #[test]
    fn test_unknown_handle() {
        let mut arena = Arena::<512>::new();
        let mut buffers = AdvBuffers::<2>::new(&mut arena.0).unwrap();

        assert_eq!(buffers.free_next(h(1), DataType::Adv), Err(AdvBufferError::UnknownHandle));
        assert_eq!(
            buffers.activate_next(h(1), DataType::Adv),
            Err(AdvBufferError::UnknownHandle)
        );
        assert_eq!(
            buffers.deactivate_current(h(1), DataType::Adv),
            Err(AdvBufferError::UnknownHandle)
        );
        assert!(!buffers.is_next_pending(h(1), DataType::Adv));
        assert!(buffers.state(h(1), DataType::Adv).is_none());
    }

    #[test]
    fn test_noop_is_not_an_error() {
        let mut arena = Arena::<512>::new();
        let mut buffers = AdvBuffers::<2>::new(&mut arena.0).unwrap();

        let allocation = buffers.alloc(h(1), DataType::Adv, 0, false).unwrap();
        assert_eq!(allocation.buffer, None);
        assert_eq!(buffers.state(h(1), DataType::Adv), Some(SlotState::Empty));

        assert_eq!(
            buffers.free_next(h(1), DataType::Adv),
            Ok(Outcome::NoOp(SlotKind::Empty))
        );
        assert_eq!(
            buffers.activate_next(h(1), DataType::Adv),
            Ok(Outcome::NoOp(SlotKind::Empty))
        );
        assert_eq!(
            buffers.deactivate_current(h(1), DataType::Adv),
            Ok(Outcome::NoOp(SlotKind::Empty))
        );
    }

    #[test]
    fn test_new_alloc_replaces_next() {
        let mut arena = Arena::<512>::new();
        let mut buffers = AdvBuffers::<2>::new(&mut arena.0).unwrap();

        buffers.alloc(h(1), DataType::Adv, 100, false).unwrap();
        let second = buffers.alloc(h(1), DataType::Adv, 40, false).unwrap();
        assert_eq!(second.len, 40);
        assert_eq!(second.old_len, 0);

        let stats = buffers.heap().stats();
        assert_eq!(stats.in_use, 40 + HEADER_SIZE);
        assert_eq!(
            buffers.state(h(1), DataType::Adv).and_then(SlotState::next),
            Some(Buffer::new(second.buffer.unwrap(), 40))
        );
    }

    #[test]
    fn test_extend_keeps_contents() {
        let mut arena = Arena::<512>::new();
        let mut buffers = AdvBuffers::<2>::new(&mut arena.0).unwrap();

        let first = buffers.alloc(h(3), DataType::ScanResp, 10, false).unwrap();
        unsafe { first.buffer.unwrap().as_ptr().write_bytes(0xAB, 10) };
        // Force the next growth to move the block
        let _blocker = buffers.alloc(h(4), DataType::ScanResp, 8, false).unwrap();

        let grown = buffers.alloc(h(3), DataType::ScanResp, 30, true).unwrap();
        assert_eq!(grown.old_len, 10);
        assert_eq!(grown.len, 40);
        let data = unsafe { core::slice::from_raw_parts(grown.buffer.unwrap().as_ptr(), 10) };
        assert!(data.iter().all(|&b| b == 0xAB));
        buffers.heap().check_integrity().unwrap();
    }

    #[test]
    fn test_extend_without_next() {
        let mut arena = Arena::<512>::new();
        let mut buffers = AdvBuffers::<2>::new(&mut arena.0).unwrap();

        assert_eq!(
            buffers.alloc(h(1), DataType::Adv, 10, true),
            Err(AdvBufferError::NoPendingNext)
        );
        // The slot claimed for the failed call was given back
        assert!(buffers.state(h(1), DataType::Adv).is_none());
        assert_eq!(buffers.table().free_slots(DataType::Adv), 2);
    }

    #[test]
    fn test_extend_failure_drops_next() {
        let mut arena = Arena::<256>::new();
        let mut buffers = AdvBuffers::<2>::new(&mut arena.0).unwrap();

        buffers.alloc(h(1), DataType::Adv, 100, false).unwrap();
        assert_eq!(
            buffers.alloc(h(1), DataType::Adv, 500, true),
            Err(AdvBufferError::OutOfMemory)
        );
        assert!(!buffers.is_next_pending(h(1), DataType::Adv));
        assert_eq!(buffers.heap().stats().free_bytes, 256);
    }

    #[test]
    fn test_out_of_memory_releases_fresh_slot() {
        let mut arena = Arena::<256>::new();
        let mut buffers = AdvBuffers::<2>::new(&mut arena.0).unwrap();

        assert_eq!(
            buffers.alloc(h(1), DataType::Adv, 1000, false),
            Err(AdvBufferError::OutOfMemory)
        );
        assert!(buffers.state(h(1), DataType::Adv).is_none());
    }

    #[test]
    fn test_table_full() {
        let mut arena = Arena::<512>::new();
        let mut buffers = AdvBuffers::<2>::new(&mut arena.0).unwrap();

        buffers.alloc(h(1), DataType::Adv, 8, false).unwrap();
        buffers.alloc(h(2), DataType::Adv, 8, false).unwrap();
        assert_eq!(
            buffers.alloc(h(3), DataType::Adv, 8, false),
            Err(AdvBufferError::NoFreeSlot)
        );
        assert!(buffers.alloc(h(3), DataType::PeriodicAdv, 8, false).is_ok());
    }

    #[test]
    fn test_redesigned_rejections() {
        let mut arena = Arena::<512>::new();
        let mut buffers = AdvBuffers::<2>::new(&mut arena.0).unwrap();
        let (handle, dt) = (h(2), DataType::Adv);

        buffers.alloc(handle, dt, 16, false).unwrap();
        buffers.activate_next(handle, dt).unwrap();
        buffers.alloc(handle, dt, 16, false).unwrap();
        assert_eq!(buffers.activate_next(handle, dt), Err(AdvBufferError::CurrentActive));
        assert_eq!(buffers.state(handle, dt).map(|s| s.kind()), Some(SlotKind::ActiveNext));

        buffers.deactivate_current(handle, dt).unwrap();
        assert_eq!(
            buffers.activate_next(handle, dt),
            Ok(Outcome::Applied(SlotKind::RetiringActive))
        );
        assert_eq!(buffers.deactivate_current(handle, dt), Err(AdvBufferError::OldPending));
        assert_eq!(buffers.alloc(handle, dt, 4, false), Err(AdvBufferError::OldPending));
    }

    #[test]
    fn test_release_frees_everything() {
        let mut arena = Arena::<512>::new();
        let mut buffers = AdvBuffers::<2>::new(&mut arena.0).unwrap();
        let (handle, dt) = (h(6), DataType::PeriodicAdv);

        buffers.alloc(handle, dt, 20, false).unwrap();
        buffers.activate_next(handle, dt).unwrap();
        buffers.deactivate_current(handle, dt).unwrap();
        buffers.alloc(handle, dt, 20, true).unwrap_err();
        buffers.alloc(h(7), dt, 30, false).unwrap();

        assert_eq!(unsafe { buffers.release(handle, dt) }, Ok(SlotKind::Retiring));
        assert!(buffers.state(handle, dt).is_none());
        assert_eq!(buffers.heap().stats().in_use, 32 + HEADER_SIZE);
    }

    #[test]
    fn test_data_update_event() {
        let mut arena = Arena::<512>::new();
        let mut buffers = AdvBuffers::<2>::new(&mut arena.0).unwrap();
        let (handle, dt) = (h(0), DataType::Adv);

        let first = buffers.alloc(handle, dt, 12, false).unwrap().buffer.unwrap();
        buffers.activate_next(handle, dt).unwrap();
        assert_eq!(buffers.on_data_update(None, Some(first)), Ok(None));
        assert_eq!(buffers.on_data_update(Some(first), Some(first)), Ok(None));

        let second = buffers.alloc(handle, dt, 12, false).unwrap().buffer.unwrap();
        buffers.deactivate_current(handle, dt).unwrap();
        buffers.activate_next(handle, dt).unwrap();

        assert_eq!(
            buffers.on_data_update(Some(first), Some(second)),
            Ok(Some(FreedOld::Old {
                handle,
                data_type: dt
            }))
        );
        assert_eq!(
            buffers.state(handle, dt),
            Some(SlotState::Active {
                current: Buffer::new(second, 12)
            })
        );
    }

    #[test]
    fn test_free_current() {
        let mut arena = Arena::<512>::new();
        let mut buffers = AdvBuffers::<2>::new(&mut arena.0).unwrap();
        let (handle, dt) = (h(4), DataType::Adv);
        let baseline = buffers.heap().stats().free_bytes;

        assert_eq!(
            unsafe { buffers.free_current(handle, dt) },
            Err(AdvBufferError::UnknownHandle)
        );

        let ptr = buffers.alloc(handle, dt, 24, false).unwrap().buffer.unwrap();
        let block = buffers.heap().usable_size(ptr).unwrap() + HEADER_SIZE;
        // Pending data is not the current data
        assert_eq!(
            unsafe { buffers.free_current(handle, dt) },
            Ok(Outcome::NoOp(SlotKind::NextOnly))
        );
        assert_eq!(buffers.heap().stats().free_bytes, baseline - block);

        buffers.activate_next(handle, dt).unwrap();
        assert_eq!(
            unsafe { buffers.free_current(handle, dt) },
            Ok(Outcome::Applied(SlotKind::Empty))
        );
        assert_eq!(buffers.state(handle, dt), Some(SlotState::Empty));
        assert_eq!(buffers.heap().stats().free_bytes, baseline);
    }

    #[test]
    fn test_free_current_keeps_old() {
        let mut arena = Arena::<512>::new();
        let mut buffers = AdvBuffers::<2>::new(&mut arena.0).unwrap();
        let (handle, dt) = (h(5), DataType::ScanResp);
        let baseline = buffers.heap().stats().free_bytes;

        let old = buffers.alloc(handle, dt, 24, false).unwrap().buffer.unwrap();
        buffers.activate_next(handle, dt).unwrap();
        buffers.alloc(handle, dt, 40, false).unwrap();
        buffers.deactivate_current(handle, dt).unwrap();
        buffers.activate_next(handle, dt).unwrap();
        let old_block = buffers.heap().usable_size(old).unwrap() + HEADER_SIZE;

        assert_eq!(
            unsafe { buffers.free_current(handle, dt) },
            Ok(Outcome::Applied(SlotKind::Retiring))
        );
        assert_eq!(buffers.heap().stats().free_bytes, baseline - old_block);
        assert_eq!(
            unsafe { buffers.free_current(handle, dt) },
            Ok(Outcome::NoOp(SlotKind::Retiring))
        );

        buffers.free_old(old).unwrap();
        assert_eq!(buffers.heap().stats().free_bytes, baseline);
    }

    #[test]
    fn test_torn_down_slot_waits_for_old() {
        let mut arena = Arena::<512>::new();
        let mut buffers = AdvBuffers::<1>::new(&mut arena.0).unwrap();
        let dt = DataType::ScanResp;

        let old = buffers.alloc(h(1), dt, 16, false).unwrap().buffer.unwrap();
        buffers.activate_next(h(1), dt).unwrap();
        let current = buffers.alloc(h(1), dt, 16, false).unwrap().buffer.unwrap();
        buffers.deactivate_current(h(1), dt).unwrap();
        buffers.activate_next(h(1), dt).unwrap();

        assert_eq!(
            buffers.free_old(current),
            Ok(FreedOld::TornDown {
                handle: h(1),
                data_type: dt
            })
        );
        assert!(buffers.state(h(1), dt).is_none());
        // The only slot still holds the retired buffer
        assert_eq!(buffers.alloc(h(2), dt, 16, false), Err(AdvBufferError::NoFreeSlot));

        assert_eq!(buffers.free_old(old), Ok(FreedOld::Parked { data_type: dt }));
        assert_eq!(buffers.table().free_slots(dt), 1);
        assert!(buffers.alloc(h(2), dt, 16, false).is_ok());
    }

    #[test]
    fn test_free_old_unknown_pointer() {
        let mut arena = Arena::<512>::new();
        let mut buffers = AdvBuffers::<2>::new(&mut arena.0).unwrap();

        let next = buffers.alloc(h(1), DataType::Adv, 12, false).unwrap().buffer.unwrap();
        // Pending data is never released by the link layer
        assert_eq!(buffers.free_old(next), Err(AdvBufferError::UnknownBuffer));
        assert!(buffers.is_next_pending(h(1), DataType::Adv));
    }
}
