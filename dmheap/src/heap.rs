//! Best-fit heap allocator
//!
//! The heap manages one fixed, contiguous arena. Every block, free or allocated,
//! starts with a [`BlockHeader`] holding its total size and its state. Free blocks
//! additionally store the arena offset of the next free block in their first
//! payload word, forming a singly linked list sorted by address.
//!
//! Allocation picks the smallest free block that fits (the first one found in
//! address order on ties), splits it when the excess is worth keeping and returns
//! a pointer to the payload. Freed blocks are merged with their free neighbours
//! right away, so two free blocks are never adjacent.
use core::marker::PhantomData;
use core::ptr::NonNull;

use crate::error::{HeapError, Result};
use crate::utils::{align_down, align_up, block_size_for};

/// Alignment of blocks and payloads.
pub const ALIGN: usize = size_of::<u32>();

/// Bytes of bookkeeping in front of every payload.
pub const HEADER_SIZE: usize = size_of::<BlockHeader>();

/// Smallest block the heap will hand out: a header and the free-list link.
pub const MIN_BLOCK_SIZE: usize = size_of::<FreeHeader>();

/// A block is only split when the excess is strictly above this value.
pub const SLACK_THRESHOLD: usize = 3 * HEADER_SIZE;

const _: () = assert!(HEADER_SIZE % ALIGN == 0);
const _: () = assert!(MIN_BLOCK_SIZE % ALIGN == 0);
const _: () = assert!(SLACK_THRESHOLD >= MIN_BLOCK_SIZE);

/// Link value terminating the free list.
const NIL: u32 = u32::MAX;

/// State stamps. Distinct patterns make a stray or repeated `free` detectable.
const BLOCK_FREE: u32 = 0x0000_F4EE;
const BLOCK_ALLOCATED: u32 = 0xA110_C8ED;

#[repr(C)]
struct BlockHeader {
    /// Total size of the block, header included
    size: u32,
    /// `BLOCK_FREE` or `BLOCK_ALLOCATED`
    state: u32,
}

#[repr(C)]
struct FreeHeader {
    header: BlockHeader,
    /// Offset of the next free block, `NIL` for the last one
    next: u32,
}

/// Usage figures of a heap.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// Usable size of the arena
    pub arena_size: usize,
    /// Bytes held by free blocks, headers included
    pub free_bytes: usize,
    /// Number of blocks in the free list
    pub free_blocks: usize,
    /// Size of the largest free block, header included
    pub largest_free_block: usize,
    /// Bytes held by allocated blocks, headers included
    pub in_use: usize,
    /// Highest value `in_use` ever reached
    pub peak_in_use: usize,
}

/// A free block, as seen by [`BestFitHeap::free_blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeBlock {
    /// Offset of the block header from the start of the arena
    pub offset: usize,
    /// Total size of the block, header included
    pub size: usize,
}

/// Best-fit allocator over a borrowed arena.
///
/// The heap does not lock: it must have a single owner, or be wrapped by the
/// caller in whatever serialization the platform offers.
pub struct BestFitHeap<'a> {
    /// First byte of the (aligned) arena
    base: NonNull<u8>,
    /// Usable size of the arena
    size: usize,
    /// Offset of the lowest free block
    head: Option<usize>,
    in_use: usize,
    peak_in_use: usize,
    _region: PhantomData<&'a mut [u8]>,
}

// SAFETY: The heap is the exclusive owner of its arena for `'a`, so moving it to
// another thread moves that ownership along with it.
unsafe impl Send for BestFitHeap<'_> {}

impl<'a> BestFitHeap<'a> {
    /// Create a heap spanning `region`, as a single free block.
    ///
    /// If `region` does not start on an `ALIGN` boundary, the leading bytes are
    /// skipped. Trailing bytes that do not fill a word are ignored as well.
    ///
    /// # Errors
    ///
    /// - `HeapError::InvalidSize` if the region cannot hold a single block,
    ///   or if it is too large for the 32-bit block headers.
    pub fn new(region: &'a mut [u8]) -> Result<Self> {
        let addr = region.as_ptr().addr();
        let adjustment = align_up(addr, ALIGN).ok_or(HeapError::InvalidSize)? - addr;
        if adjustment >= region.len() {
            return Err(HeapError::InvalidSize);
        }

        let size = align_down(region.len() - adjustment, ALIGN);
        if size < MIN_BLOCK_SIZE || u32::try_from(size).is_err() {
            return Err(HeapError::InvalidSize);
        }

        let base = NonNull::from(&mut region[adjustment..]).cast::<u8>();

        let mut heap = Self {
            base,
            size,
            head: None,
            in_use: 0,
            peak_in_use: 0,
            _region: PhantomData,
        };
        heap.set_block_size(0, size);
        heap.set_state(0, BLOCK_FREE);
        heap.set_next(0, None);
        heap.head = Some(0);

        log::trace!("dmheap: arena of {size} bytes at {:p}", heap.base);
        Ok(heap)
    }

    /// Allocate `size` bytes.
    ///
    /// The returned pointer is aligned to `ALIGN` and valid for `size` bytes,
    /// until it is given back to [`free`](Self::free) or
    /// [`realloc`](Self::realloc). A zero-sized request is legal and returns a
    /// minimal block.
    ///
    /// # Errors
    ///
    /// - `HeapError::OutOfMemory` if no free block is large enough. The heap is
    ///   left untouched.
    pub fn alloc(&mut self, size: usize) -> Result<NonNull<u8>> {
        let wanted = block_size_for(size).ok_or(HeapError::OutOfMemory)?;

        let Some(best) = self.find_best_fit(wanted) else {
            log::debug!("dmheap: no free block for {size} bytes");
            return Err(HeapError::OutOfMemory);
        };

        self.unlink(best);
        let kept = self.split(best, wanted);
        self.set_block_size(best, kept);
        self.set_state(best, BLOCK_ALLOCATED);
        self.account_alloc(kept);

        log::trace!("dmheap: alloc({size}) -> block {best:#x} of {kept} bytes");
        Ok(self.payload(best))
    }

    /// Give a block back to the heap.
    ///
    /// The block is merged with the free blocks right before and right after it.
    ///
    /// # Safety
    ///
    /// - `ptr` must have been returned by this heap and not freed since
    /// - The payload must not be accessed after this call
    ///
    /// # Errors
    ///
    /// - `HeapError::InvalidPointer` if `ptr` cannot be a payload of this arena
    /// - `HeapError::DoubleFree` if the block is already free
    ///
    /// In both cases the heap is left untouched.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) -> Result<()> {
        let offset = self.allocated_offset(ptr)?;
        let size = self.block_size(offset);

        self.set_state(offset, BLOCK_FREE);
        self.account_free(size);
        self.insert_free(offset);

        log::trace!("dmheap: free(block {offset:#x} of {size} bytes)");
        Ok(())
    }

    /// Same as [`free`](Self::free), `None` being a no-op.
    ///
    /// # Safety
    ///
    /// See [`free`](Self::free).
    ///
    /// # Errors
    ///
    /// See [`free`](Self::free).
    pub unsafe fn free_opt(&mut self, ptr: Option<NonNull<u8>>) -> Result<()> {
        match ptr {
            // SAFETY: Forwarded to the caller
            Some(ptr) => unsafe { self.free(ptr) },
            None => Ok(()),
        }
    }

    /// Resize a block to `new_size` bytes.
    ///
    /// The block is shrunk in place when it is already large enough, and grown in
    /// place when the block right after it is free and covers the shortfall.
    /// Otherwise a new block is allocated, the contents are copied and the old
    /// block is freed.
    ///
    /// # Safety
    ///
    /// - `ptr` must have been returned by this heap and not freed since
    /// - If the returned pointer differs from `ptr`, `ptr` must not be used anymore
    ///
    /// # Errors
    ///
    /// - `HeapError::OutOfMemory` if the block cannot grow. The original block is
    ///   left allocated and its contents untouched.
    /// - `HeapError::InvalidPointer` or `HeapError::DoubleFree` as for `free`.
    pub unsafe fn realloc(&mut self, ptr: NonNull<u8>, new_size: usize) -> Result<NonNull<u8>> {
        let offset = self.allocated_offset(ptr)?;
        let wanted = block_size_for(new_size).ok_or(HeapError::OutOfMemory)?;
        let current = self.block_size(offset);

        if current >= wanted {
            let kept = self.split(offset, wanted);
            self.set_block_size(offset, kept);
            self.account_free(current - kept);
            return Ok(ptr);
        }

        let shortfall = wanted - current;
        let neighbour = offset + current;
        if neighbour < self.size
            && self.state(neighbour) == BLOCK_FREE
            && self.block_size(neighbour) >= shortfall
        {
            self.unlink(neighbour);
            let absorbed = self.split(neighbour, shortfall);
            self.set_block_size(offset, current + absorbed);
            self.account_alloc(absorbed);

            log::trace!("dmheap: realloc grew block {offset:#x} in place by {absorbed} bytes");
            return Ok(ptr);
        }

        // The original block stays valid until the new one is secured
        let new_ptr = self.alloc(new_size)?;
        let count = new_size.min(current - HEADER_SIZE);
        // SAFETY: Both payloads are valid for `count` bytes and they are distinct
        // blocks, hence they do not overlap.
        unsafe { core::ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), count) };
        // SAFETY: `ptr` was validated above and the caller gives it up
        unsafe { self.free(ptr) }?;

        log::trace!("dmheap: realloc moved block {offset:#x} to {:p}", new_ptr);
        Ok(new_ptr)
    }

    /// Number of payload bytes available behind `ptr`.
    ///
    /// This can be more than requested, because of alignment and because small
    /// excesses are not split off.
    ///
    /// # Errors
    ///
    /// - `HeapError::InvalidPointer` or `HeapError::DoubleFree` as for `free`.
    pub fn usable_size(&self, ptr: NonNull<u8>) -> Result<usize> {
        let offset = self.allocated_offset(ptr)?;
        Ok(self.block_size(offset) - HEADER_SIZE)
    }

    #[must_use]
    #[inline]
    /// Returns true if `ptr` points inside the arena.
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        let start = self.base.addr().get();
        (start..start + self.size).contains(&ptr.addr().get())
    }

    #[must_use]
    #[inline]
    pub const fn arena_size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            arena_size: self.size,
            in_use: self.in_use,
            peak_in_use: self.peak_in_use,
            ..HeapStats::default()
        };
        for block in self.free_blocks() {
            stats.free_bytes += block.size;
            stats.free_blocks += 1;
            stats.largest_free_block = stats.largest_free_block.max(block.size);
        }
        stats
    }

    #[must_use]
    /// Iterate over the free list, in address order.
    pub const fn free_blocks(&self) -> FreeBlocks<'_, 'a> {
        FreeBlocks {
            heap: self,
            cursor: self.head,
        }
    }

    /// Walk the whole arena and the free list, checking every invariant.
    ///
    /// # Errors
    ///
    /// - `HeapError::Corrupted` at the first inconsistency found.
    pub fn check_integrity(&self) -> Result<()> {
        let mut offset = 0;
        let mut free_bytes = 0;
        let mut free_count = 0;
        let mut previous_free = false;

        while offset < self.size {
            if self.size - offset < MIN_BLOCK_SIZE {
                return Err(HeapError::Corrupted);
            }
            let size = self.block_size(offset);
            if size < MIN_BLOCK_SIZE || size % ALIGN != 0 || size > self.size - offset {
                return Err(HeapError::Corrupted);
            }
            match self.state(offset) {
                BLOCK_FREE => {
                    // Neighbouring free blocks must have been merged
                    if previous_free {
                        return Err(HeapError::Corrupted);
                    }
                    previous_free = true;
                    free_bytes += size;
                    free_count += 1;
                }
                BLOCK_ALLOCATED => previous_free = false,
                _ => return Err(HeapError::Corrupted),
            }
            offset += size;
        }

        let mut listed_bytes = 0;
        let mut listed_count = 0;
        let mut last = None;
        for block in self.free_blocks() {
            if last.is_some_and(|last| block.offset <= last)
                || self.state(block.offset) != BLOCK_FREE
                || listed_count >= free_count
            {
                return Err(HeapError::Corrupted);
            }
            last = Some(block.offset);
            listed_bytes += block.size;
            listed_count += 1;
        }

        if listed_count != free_count
            || listed_bytes != free_bytes
            || free_bytes + self.in_use != self.size
        {
            return Err(HeapError::Corrupted);
        }
        Ok(())
    }

    /// Smallest free block of at least `wanted` bytes, lowest address on ties.
    fn find_best_fit(&self, wanted: usize) -> Option<usize> {
        let mut best: Option<(usize, usize)> = None;
        for block in self.free_blocks() {
            if block.size >= wanted && best.is_none_or(|(_, size)| block.size < size) {
                best = Some((block.offset, block.size));
                if block.size == wanted {
                    break;
                }
            }
        }
        best.map(|(offset, _)| offset)
    }

    /// Detach a block from the free list.
    fn unlink(&mut self, offset: usize) {
        debug_assert_eq!(self.state(offset), BLOCK_FREE);

        let next = self.next(offset);
        if self.head == Some(offset) {
            self.head = next;
            return;
        }

        let mut cursor = self.head;
        while let Some(current) = cursor {
            let after = self.next(current);
            if after == Some(offset) {
                self.set_next(current, next);
                return;
            }
            cursor = after;
        }
        debug_assert!(false, "block {offset:#x} is not in the free list");
    }

    /// Insert a block into the free list, merging it with adjacent free blocks.
    fn insert_free(&mut self, offset: usize) {
        let mut previous = None;
        let mut cursor = self.head;
        while let Some(current) = cursor {
            if current > offset {
                break;
            }
            previous = Some(current);
            cursor = self.next(current);
        }

        self.set_next(offset, cursor);
        match previous {
            Some(previous) => self.set_next(previous, Some(offset)),
            None => self.head = Some(offset),
        }

        if let Some(next) = cursor
            && offset + self.block_size(offset) == next
        {
            let merged = self.block_size(offset) + self.block_size(next);
            self.set_next(offset, self.next(next));
            self.set_block_size(offset, merged);
        }

        if let Some(previous) = previous
            && previous + self.block_size(previous) == offset
        {
            let merged = self.block_size(previous) + self.block_size(offset);
            self.set_next(previous, self.next(offset));
            self.set_block_size(previous, merged);
        }
    }

    /// Release the tail of a detached block beyond `wanted` bytes, if the excess
    /// is above the slack threshold.
    ///
    /// Returns the size the block keeps.
    fn split(&mut self, offset: usize, wanted: usize) -> usize {
        let total = self.block_size(offset);
        debug_assert!(total >= wanted);

        let excess = total - wanted;
        if excess <= SLACK_THRESHOLD {
            return total;
        }

        let rest = offset + wanted;
        self.set_block_size(rest, excess);
        self.set_state(rest, BLOCK_FREE);
        self.insert_free(rest);
        wanted
    }

    /// Offset of the header of an allocated payload.
    fn allocated_offset(&self, ptr: NonNull<u8>) -> Result<usize> {
        let addr = ptr.addr().get();
        let start = self.base.addr().get();
        if addr < start + HEADER_SIZE || addr >= start + self.size {
            log::warn!("dmheap: {ptr:p} is outside of the arena");
            return Err(HeapError::InvalidPointer);
        }

        let offset = addr - start - HEADER_SIZE;
        if offset % ALIGN != 0 || self.size - offset < MIN_BLOCK_SIZE {
            log::warn!("dmheap: {ptr:p} is not a payload pointer");
            return Err(HeapError::InvalidPointer);
        }

        match self.state(offset) {
            BLOCK_ALLOCATED => {
                let size = self.block_size(offset);
                if size < MIN_BLOCK_SIZE || size > self.size - offset {
                    log::warn!("dmheap: block {offset:#x} has a corrupted header");
                    return Err(HeapError::Corrupted);
                }
                Ok(offset)
            }
            BLOCK_FREE => {
                log::warn!("dmheap: double free of {ptr:p}");
                Err(HeapError::DoubleFree)
            }
            _ => {
                log::warn!("dmheap: {ptr:p} is not a payload pointer");
                Err(HeapError::InvalidPointer)
            }
        }
    }

    const fn account_alloc(&mut self, bytes: usize) {
        self.in_use += bytes;
        if self.in_use > self.peak_in_use {
            self.peak_in_use = self.in_use;
        }
    }

    const fn account_free(&mut self, bytes: usize) {
        self.in_use -= bytes;
    }

    #[inline]
    fn payload(&self, offset: usize) -> NonNull<u8> {
        // SAFETY: A block is at least `MIN_BLOCK_SIZE` bytes and lies inside the arena
        unsafe { self.base.add(offset + HEADER_SIZE) }
    }

    #[inline]
    #[allow(clippy::cast_ptr_alignment)]
    fn header(&self, offset: usize) -> *mut FreeHeader {
        debug_assert!(offset % ALIGN == 0);
        debug_assert!(offset + MIN_BLOCK_SIZE <= self.size);
        // SAFETY: Every offset handed here is the start of a block, which lies
        // inside the arena and is `ALIGN`-aligned, as is `base`.
        unsafe { self.base.as_ptr().add(offset) }.cast::<FreeHeader>()
    }

    #[inline]
    fn block_size(&self, offset: usize) -> usize {
        // SAFETY: `header` only yields in-bounds, aligned pointers
        unsafe { (*self.header(offset)).header.size as usize }
    }

    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    fn set_block_size(&mut self, offset: usize, size: usize) {
        // Block sizes never exceed the arena size, checked to fit in 32 bits
        // SAFETY: `header` only yields in-bounds, aligned pointers
        unsafe { (*self.header(offset)).header.size = size as u32 };
    }

    #[inline]
    fn state(&self, offset: usize) -> u32 {
        // SAFETY: `header` only yields in-bounds, aligned pointers
        unsafe { (*self.header(offset)).header.state }
    }

    #[inline]
    fn set_state(&mut self, offset: usize, state: u32) {
        // SAFETY: `header` only yields in-bounds, aligned pointers
        unsafe { (*self.header(offset)).header.state = state };
    }

    #[inline]
    fn next(&self, offset: usize) -> Option<usize> {
        // SAFETY: `header` only yields in-bounds, aligned pointers
        let link = unsafe { (*self.header(offset)).next };
        (link != NIL).then_some(link as usize)
    }

    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    fn set_next(&mut self, offset: usize, next: Option<usize>) {
        // Offsets are below the arena size, which is below `NIL`
        let link = next.map_or(NIL, |next| next as u32);
        // SAFETY: `header` only yields in-bounds, aligned pointers
        unsafe { (*self.header(offset)).next = link };
    }
}

/// Iterator over the free list of a [`BestFitHeap`].
pub struct FreeBlocks<'h, 'a> {
    heap: &'h BestFitHeap<'a>,
    cursor: Option<usize>,
}

impl Iterator for FreeBlocks<'_, '_> {
    type Item = FreeBlock;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.cursor?;
        self.cursor = self.heap.next(offset);
        Some(FreeBlock {
            offset,
            size: self.heap.block_size(offset),
        })
    }
}
