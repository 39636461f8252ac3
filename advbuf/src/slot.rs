//! Slot table keyed by (handle, data type).
//!
//! Each slot carries up to three buffers: `old` (retired but possibly still
//! read by the link layer), `current` (owned by the link layer) and `next`
//! (being filled by the host). The legal combinations are spelled out by
//! [`SlotState`].

use crate::{
    config::{NUM_ADV_SETS, NUM_DATA_TYPES, UNUSED_HANDLE},
    types::{AdvHandle, Buffer, DataType},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Buffers held by a slot.
pub enum SlotState {
    Empty,
    NextOnly { next: Buffer },
    Active { current: Buffer },
    ActiveNext { current: Buffer, next: Buffer },
    Retiring { old: Buffer },
    RetiringNext { old: Buffer, next: Buffer },
    RetiringActive { old: Buffer, current: Buffer },
    Full { old: Buffer, current: Buffer, next: Buffer },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Shape of a [`SlotState`], without the buffers.
pub enum SlotKind {
    Empty,
    NextOnly,
    Active,
    ActiveNext,
    Retiring,
    RetiringNext,
    RetiringActive,
    Full,
}

impl SlotState {
    #[must_use]
    pub const fn from_parts(
        old: Option<Buffer>,
        current: Option<Buffer>,
        next: Option<Buffer>,
    ) -> Self {
        match (old, current, next) {
            (None, None, None) => Self::Empty,
            (None, None, Some(next)) => Self::NextOnly { next },
            (None, Some(current), None) => Self::Active { current },
            (None, Some(current), Some(next)) => Self::ActiveNext { current, next },
            (Some(old), None, None) => Self::Retiring { old },
            (Some(old), None, Some(next)) => Self::RetiringNext { old, next },
            (Some(old), Some(current), None) => Self::RetiringActive { old, current },
            (Some(old), Some(current), Some(next)) => Self::Full { old, current, next },
        }
    }

    /// Returns `(old, current, next)`.
    #[must_use]
    pub const fn parts(self) -> (Option<Buffer>, Option<Buffer>, Option<Buffer>) {
        match self {
            Self::Empty => (None, None, None),
            Self::NextOnly { next } => (None, None, Some(next)),
            Self::Active { current } => (None, Some(current), None),
            Self::ActiveNext { current, next } => (None, Some(current), Some(next)),
            Self::Retiring { old } => (Some(old), None, None),
            Self::RetiringNext { old, next } => (Some(old), None, Some(next)),
            Self::RetiringActive { old, current } => (Some(old), Some(current), None),
            Self::Full { old, current, next } => (Some(old), Some(current), Some(next)),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> SlotKind {
        match self {
            Self::Empty => SlotKind::Empty,
            Self::NextOnly { .. } => SlotKind::NextOnly,
            Self::Active { .. } => SlotKind::Active,
            Self::ActiveNext { .. } => SlotKind::ActiveNext,
            Self::Retiring { .. } => SlotKind::Retiring,
            Self::RetiringNext { .. } => SlotKind::RetiringNext,
            Self::RetiringActive { .. } => SlotKind::RetiringActive,
            Self::Full { .. } => SlotKind::Full,
        }
    }

    #[must_use]
    #[inline]
    pub const fn old(self) -> Option<Buffer> {
        self.parts().0
    }

    #[must_use]
    #[inline]
    pub const fn current(self) -> Option<Buffer> {
        self.parts().1
    }

    #[must_use]
    #[inline]
    pub const fn next(self) -> Option<Buffer> {
        self.parts().2
    }

    #[must_use]
    #[inline]
    pub const fn with_old(self, old: Option<Buffer>) -> Self {
        let (_, current, next) = self.parts();
        Self::from_parts(old, current, next)
    }

    #[must_use]
    #[inline]
    pub const fn with_current(self, current: Option<Buffer>) -> Self {
        let (old, _, next) = self.parts();
        Self::from_parts(old, current, next)
    }

    #[must_use]
    #[inline]
    pub const fn with_next(self, next: Option<Buffer>) -> Self {
        let (old, current, _) = self.parts();
        Self::from_parts(old, current, next)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    handle: u8,
    state: SlotState,
}

impl Slot {
    pub const UNUSED: Self = Self {
        handle: UNUSED_HANDLE,
        state: SlotState::Empty,
    };

    #[must_use]
    #[inline]
    pub const fn is_unused(&self) -> bool {
        self.handle == UNUSED_HANDLE
    }

    /// Unused and holding no buffer, so it can be claimed.
    #[must_use]
    #[inline]
    pub const fn is_free(&self) -> bool {
        self.is_unused() && matches!(self.state, SlotState::Empty)
    }

    /// Handle owning this slot, `None` if the slot is free.
    #[must_use]
    pub fn handle(&self) -> Option<AdvHandle> {
        AdvHandle::new(self.handle).ok()
    }

    #[must_use]
    #[inline]
    pub const fn state(&self) -> SlotState {
        self.state
    }

    #[inline]
    pub(crate) const fn set_state(&mut self, state: SlotState) {
        self.state = state;
    }

    /// Forget the buffers and give the slot back to the table.
    ///
    /// The caller is responsible for freeing what the slot held.
    #[inline]
    pub(crate) const fn reset(&mut self) {
        *self = Self::UNUSED;
    }

    /// Give the slot back to the table, keeping only its `old` buffer.
    ///
    /// The slot cannot be claimed again until `old` is released.
    #[inline]
    pub(crate) const fn park(&mut self) {
        self.handle = UNUSED_HANDLE;
        self.state = SlotState::from_parts(self.state.old(), None, None);
    }
}

#[derive(Debug, Clone)]
/// Fixed table of `NUM_DATA_TYPES * SETS` slots.
pub struct SlotTable<const SETS: usize = NUM_ADV_SETS> {
    slots: [[Slot; SETS]; NUM_DATA_TYPES],
}

impl<const SETS: usize> Default for SlotTable<SETS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const SETS: usize> SlotTable<SETS> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [[Slot::UNUSED; SETS]; NUM_DATA_TYPES],
        }
    }

    #[must_use]
    pub fn find(&self, handle: AdvHandle, data_type: DataType) -> Option<&Slot> {
        self.slots[data_type.index()]
            .iter()
            .find(|slot| slot.handle == handle.get())
    }

    pub fn find_mut(&mut self, handle: AdvHandle, data_type: DataType) -> Option<&mut Slot> {
        self.slots[data_type.index()]
            .iter_mut()
            .find(|slot| slot.handle == handle.get())
    }

    /// Assign the first free slot of `data_type` to `handle`.
    ///
    /// The slot already owned by `handle` is returned untouched, if any.
    /// Returns `None` when every slot of that data type is in use.
    pub fn claim(&mut self, handle: AdvHandle, data_type: DataType) -> Option<&mut Slot> {
        let row = &mut self.slots[data_type.index()];
        let index = match row.iter().position(|slot| slot.handle == handle.get()) {
            Some(index) => index,
            None => {
                let index = row.iter().position(Slot::is_free)?;
                row[index] = Slot {
                    handle: handle.get(),
                    state: SlotState::Empty,
                };
                index
            }
        };
        Some(&mut row[index])
    }

    #[must_use]
    pub fn free_slots(&self, data_type: DataType) -> usize {
        self.slots[data_type.index()]
            .iter()
            .filter(|slot| slot.is_free())
            .count()
    }

    #[inline]
    pub(crate) fn slots_mut(&mut self, data_type: DataType) -> &mut [Slot; SETS] {
        &mut self.slots[data_type.index()]
    }

    /// Iterate over claimed slots, data type outer, set inner.
    pub fn iter(&self) -> impl Iterator<Item = (DataType, &Slot)> {
        DataType::ALL.into_iter().flat_map(move |dt| {
            self.slots[dt.index()]
                .iter()
                .filter(|slot| !slot.is_unused())
                .map(move |slot| (dt, slot))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::ptr::NonNull;

    fn buffer(len: usize) -> Buffer {
        Buffer::new(NonNull::dangling(), len)
    }

    #[test]
    fn test_state_parts_round_trip() {
        let (o, c, n) = (Some(buffer(1)), Some(buffer(2)), Some(buffer(3)));
        for old in [None, o] {
            for current in [None, c] {
                for next in [None, n] {
                    let state = SlotState::from_parts(old, current, next);
                    assert_eq!(state.parts(), (old, current, next));
                }
            }
        }
        assert_eq!(SlotState::from_parts(None, None, None).kind(), SlotKind::Empty);
        assert_eq!(SlotState::from_parts(o, c, n).kind(), SlotKind::Full);
        assert_eq!(SlotState::from_parts(o, None, n).kind(), SlotKind::RetiringNext);
    }

    #[test]
    fn test_state_transitions() {
        let state = SlotState::Empty.with_next(Some(buffer(20)));
        assert_eq!(state.kind(), SlotKind::NextOnly);

        let state = state.with_current(state.next()).with_next(None);
        assert_eq!(state, SlotState::Active { current: buffer(20) });

        let state = state.with_old(state.current()).with_current(None);
        assert_eq!(state.kind(), SlotKind::Retiring);
        assert_eq!(state.with_old(None), SlotState::Empty);
    }

    #[test]
    fn test_claim_and_find() {
        let mut table = SlotTable::<2>::new();
        let h1 = AdvHandle::new(1).unwrap();
        let h2 = AdvHandle::new(2).unwrap();
        let h3 = AdvHandle::new(3).unwrap();

        assert!(table.find(h1, DataType::Adv).is_none());
        assert!(table.claim(h1, DataType::Adv).is_some());
        assert!(table.claim(h2, DataType::Adv).is_some());
        assert!(table.claim(h3, DataType::Adv).is_none());

        // Data types have separate rows
        assert!(table.claim(h3, DataType::ScanResp).is_some());
        assert_eq!(table.free_slots(DataType::ScanResp), 1);
        assert_eq!(table.free_slots(DataType::PeriodicAdv), 2);

        let slot = table.find(h2, DataType::Adv).unwrap();
        assert_eq!(slot.handle(), Some(h2));
        assert!(table.find(h2, DataType::ScanResp).is_none());

        table.find_mut(h1, DataType::Adv).unwrap().reset();
        assert_eq!(table.free_slots(DataType::Adv), 1);
        assert!(table.claim(h3, DataType::Adv).is_some());
    }

    #[test]
    fn test_claim_is_idempotent() {
        let mut table = SlotTable::<2>::new();
        let h1 = AdvHandle::new(1).unwrap();

        table.claim(h1, DataType::Adv).unwrap().set_state(SlotState::Active {
            current: buffer(8),
        });
        let again = table.claim(h1, DataType::Adv).unwrap();
        assert_eq!(again.state(), SlotState::Active { current: buffer(8) });

        assert_eq!(table.free_slots(DataType::Adv), 1);
        assert_eq!(table.iter().count(), 1);
    }

    #[test]
    fn test_parked_slot_not_claimable() {
        let mut table = SlotTable::<1>::new();
        let h1 = AdvHandle::new(1).unwrap();
        let h2 = AdvHandle::new(2).unwrap();

        let slot = table.claim(h1, DataType::Adv).unwrap();
        slot.set_state(SlotState::from_parts(Some(buffer(4)), Some(buffer(8)), None));
        slot.park();
        assert!(slot.is_unused());
        assert_eq!(slot.state(), SlotState::Retiring { old: buffer(4) });

        assert!(table.find(h1, DataType::Adv).is_none());
        assert_eq!(table.free_slots(DataType::Adv), 0);
        assert!(table.claim(h2, DataType::Adv).is_none());
        assert_eq!(table.iter().count(), 0);

        table.slots_mut(DataType::Adv)[0].set_state(SlotState::Empty);
        assert_eq!(table.free_slots(DataType::Adv), 1);
        assert!(table.claim(h2, DataType::Adv).is_some());
    }

    #[test]
    fn test_iter_order() {
        let mut table = SlotTable::<2>::new();
        let h7 = AdvHandle::new(7).unwrap();
        let h9 = AdvHandle::new(9).unwrap();
        table.claim(h9, DataType::PeriodicAdv);
        table.claim(h7, DataType::Adv);
        table.claim(h9, DataType::Adv);

        let order: Vec<_> = table
            .iter()
            .map(|(dt, slot)| (dt, slot.handle().unwrap().get()))
            .collect();
        assert_eq!(
            order,
            [(DataType::Adv, 7), (DataType::Adv, 9), (DataType::PeriodicAdv, 9)]
        );
    }
}
