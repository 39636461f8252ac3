use crate::heap::{ALIGN, HEADER_SIZE, MIN_BLOCK_SIZE};

/// Align `value` upwards to `align`.
///
/// Requires that `align` is a power of two.
/// Returns `None` on overflow.
#[inline]
pub const fn align_up(value: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Align `value` downwards to `align`.
#[inline]
pub const fn align_down(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    value & !(align - 1)
}

/// Size of the block (header included) needed to serve a `size`-byte request.
#[inline]
pub const fn block_size_for(size: usize) -> Option<usize> {
    let Some(payload) = align_up(size, ALIGN) else {
        return None;
    };
    match payload.checked_add(HEADER_SIZE) {
        Some(total) if total < MIN_BLOCK_SIZE => Some(MIN_BLOCK_SIZE),
        Some(total) => Some(total),
        None => None,
    }
}
