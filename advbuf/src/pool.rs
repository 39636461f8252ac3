//! Pools of equally sized buffers.
//!
//! Legacy advertising data and PAwR data have a small fixed maximum size, so
//! they are served from dedicated arrays instead of the heap. Each pool tracks
//! at most 64 buffers with a bitmask.

use crate::{
    config::{LEGACY_ADV_DATA_SIZE, PAWR_RESPONSE_DATA_SIZE, PAWR_SUBEVENT_DATA_SIZE},
    error::{AdvBufferError, Result},
};
use core::{marker::PhantomData, ptr::NonNull};
use num_enum::{IntoPrimitive, TryFromPrimitive};

pub type LegacyAdvPool<'a> = BufferPool<'a, LEGACY_ADV_DATA_SIZE>;
pub type PawrSubeventPool<'a> = BufferPool<'a, PAWR_SUBEVENT_DATA_SIZE>;
pub type PawrResponsePool<'a> = BufferPool<'a, PAWR_RESPONSE_DATA_SIZE>;

/// Bitmask allocator over `SIZE`-byte buffers.
pub struct BufferPool<'a, const SIZE: usize> {
    base: NonNull<[u8; SIZE]>,
    count: usize,
    used: u64,
    _storage: PhantomData<&'a mut [[u8; SIZE]]>,
}

// SAFETY: The pool has exclusive access to its storage
unsafe impl<const SIZE: usize> Send for BufferPool<'_, SIZE> {}

impl<'a, const SIZE: usize> BufferPool<'a, SIZE> {
    const NON_EMPTY_BUFFERS: () = assert!(SIZE > 0, "Pool buffers cannot be empty");

    /// Maximum number of buffers in a pool.
    pub const MAX_BUFFERS: usize = u64::BITS as usize;

    /// Build a pool handing out the buffers of `storage`, all free.
    ///
    /// # Errors
    ///
    /// - `AdvBufferError::InvalidPoolSize` if `storage` holds more than
    ///   `MAX_BUFFERS` buffers.
    pub fn new(storage: &'a mut [[u8; SIZE]]) -> Result<Self> {
        let () = Self::NON_EMPTY_BUFFERS;

        let count = storage.len();
        if count > Self::MAX_BUFFERS {
            return Err(AdvBufferError::InvalidPoolSize(count));
        }

        Ok(Self {
            base: NonNull::from(storage).cast::<[u8; SIZE]>(),
            count,
            used: 0,
            _storage: PhantomData,
        })
    }

    /// Take the free buffer with the lowest index.
    pub fn alloc(&mut self) -> Option<NonNull<u8>> {
        let Some(index) = (0..self.count).find(|&i| !self.is_used(i)) else {
            log::debug!("advbuf: all {} buffers of {SIZE} bytes in use", self.count);
            return None;
        };
        self.used |= 1_u64 << index;

        // SAFETY: `index` is within the storage
        Some(unsafe { self.base.add(index) }.cast::<u8>())
    }

    /// Give a buffer back to the pool.
    ///
    /// Returns false, leaving the pool untouched, if `ptr` is not a buffer of
    /// this pool or if it is already free.
    pub fn free(&mut self, ptr: NonNull<u8>) -> bool {
        let Some(index) = self.index_of(ptr) else {
            log::warn!("advbuf: {ptr:p} is not a {SIZE}-byte pool buffer");
            return false;
        };
        if !self.is_used(index) {
            log::warn!("advbuf: pool buffer {index} freed twice");
            return false;
        }
        self.used &= !(1_u64 << index);
        true
    }

    #[must_use]
    pub fn available(&self) -> usize {
        (0..self.count).filter(|&i| !self.is_used(i)).count()
    }

    #[must_use]
    #[inline]
    pub const fn capacity(&self) -> usize {
        self.count
    }

    #[inline]
    const fn is_used(&self, index: usize) -> bool {
        self.used & (1_u64 << index) != 0
    }

    fn index_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        let offset = ptr.addr().get().checked_sub(self.base.addr().get())?;
        let index = offset / SIZE;
        (offset % SIZE == 0 && index < self.count).then_some(index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
/// Kind of PAwR buffer.
pub enum PawrDataType {
    Subevent = 0x00,
    Response = 0x01,
}

/// Subevent and response buffers for Periodic Advertising with Responses.
pub struct PawrPools<'a> {
    subevents: PawrSubeventPool<'a>,
    responses: PawrResponsePool<'a>,
}

impl<'a> PawrPools<'a> {
    /// # Errors
    ///
    /// - `AdvBufferError::InvalidPoolSize` if a storage holds too many buffers.
    pub fn new(
        subevents: &'a mut [[u8; PAWR_SUBEVENT_DATA_SIZE]],
        responses: &'a mut [[u8; PAWR_RESPONSE_DATA_SIZE]],
    ) -> Result<Self> {
        Ok(Self {
            subevents: BufferPool::new(subevents)?,
            responses: BufferPool::new(responses)?,
        })
    }

    /// Fill `out` with subevent buffers.
    ///
    /// Either every entry is filled or no buffer is taken.
    ///
    /// # Errors
    ///
    /// - `AdvBufferError::OutOfMemory` if fewer than `out.len()` buffers are free.
    pub fn alloc_subevents(&mut self, out: &mut [Option<NonNull<u8>>]) -> Result<()> {
        if self.subevents.available() < out.len() {
            log::debug!(
                "advbuf: {} subevent buffers requested, {} available",
                out.len(),
                self.subevents.available()
            );
            return Err(AdvBufferError::OutOfMemory);
        }
        for entry in out {
            *entry = self.subevents.alloc();
        }
        Ok(())
    }

    pub fn alloc_response(&mut self) -> Option<NonNull<u8>> {
        self.responses.alloc()
    }

    /// Give back a buffer of the given kind. See [`BufferPool::free`].
    pub fn free(&mut self, ptr: NonNull<u8>, data_type: PawrDataType) -> bool {
        match data_type {
            PawrDataType::Subevent => self.subevents.free(ptr),
            PawrDataType::Response => self.responses.free(ptr),
        }
    }

    #[must_use]
    pub fn subevents_available(&self) -> usize {
        self.subevents.available()
    }

    #[must_use]
    pub fn responses_available(&self) -> usize {
        self.responses.available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NUM_LEGACY_BUFFERS, PAWR_RESPONSE_COUNT, PAWR_SUBEVENT_COUNT};

    #[test]
    fn test_lowest_index_first() {
        let mut storage = [[0u8; LEGACY_ADV_DATA_SIZE]; NUM_LEGACY_BUFFERS];
        let base = storage.as_ptr().addr();
        let mut pool = LegacyAdvPool::new(&mut storage).unwrap();

        let ptrs: Vec<_> = (0..NUM_LEGACY_BUFFERS).map(|_| pool.alloc().unwrap()).collect();
        for (i, ptr) in ptrs.iter().enumerate() {
            assert_eq!(ptr.addr().get(), base + i * LEGACY_ADV_DATA_SIZE);
        }
        assert_eq!(pool.alloc(), None);

        assert!(pool.free(ptrs[2]));
        assert!(pool.free(ptrs[1]));
        assert_eq!(pool.available(), 2);
        assert_eq!(pool.alloc(), Some(ptrs[1]));
    }

    #[test]
    fn test_free_rejects_foreign_pointers() {
        let mut storage = [[0u8; 16]; 3];
        let mut pool = BufferPool::new(&mut storage).unwrap();
        let ptr = pool.alloc().unwrap();

        let mut other = [0u8; 16];
        assert!(!pool.free(NonNull::from(&mut other).cast()));
        // Inside the pool, but not at a buffer boundary
        assert!(!pool.free(unsafe { ptr.add(4) }));
        assert_eq!(pool.available(), 2);

        assert!(pool.free(ptr));
        assert!(!pool.free(ptr));
        assert_eq!(pool.available(), pool.capacity());
    }

    #[test]
    fn test_pool_size_limit() {
        let mut storage = [[0u8; 1]; 65];
        assert_eq!(
            BufferPool::new(&mut storage).err(),
            Some(AdvBufferError::InvalidPoolSize(65))
        );

        let mut storage = [[0u8; 1]; 64];
        let mut pool = BufferPool::new(&mut storage).unwrap();
        for _ in 0..64 {
            assert!(pool.alloc().is_some());
        }
        assert_eq!(pool.alloc(), None);
    }

    #[test]
    fn test_pawr_pools() {
        let mut subevents = [[0u8; PAWR_SUBEVENT_DATA_SIZE]; PAWR_SUBEVENT_COUNT];
        let mut responses = [[0u8; PAWR_RESPONSE_DATA_SIZE]; PAWR_RESPONSE_COUNT];
        let mut pools = PawrPools::new(&mut subevents, &mut responses).unwrap();

        let mut batch = [None; 5];
        pools.alloc_subevents(&mut batch).unwrap();
        assert!(batch.iter().all(Option::is_some));
        assert_eq!(pools.subevents_available(), 3);

        // All or nothing
        let mut too_many = [None; 4];
        assert_eq!(pools.alloc_subevents(&mut too_many), Err(AdvBufferError::OutOfMemory));
        assert!(too_many.iter().all(Option::is_none));
        assert_eq!(pools.subevents_available(), 3);

        let response = pools.alloc_response().unwrap();
        assert_eq!(pools.responses_available(), PAWR_RESPONSE_COUNT - 1);
        // Freed through the wrong pool
        assert!(!pools.free(response, PawrDataType::Subevent));
        assert!(pools.free(response, PawrDataType::Response));

        let kind = PawrDataType::try_from(0x01).unwrap();
        assert!(pools.free(batch[0].unwrap(), PawrDataType::Subevent));
        assert_eq!(kind, PawrDataType::Response);
        assert!(PawrDataType::try_from(0x02).is_err());
    }
}
