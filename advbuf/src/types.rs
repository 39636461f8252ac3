use crate::{
    config::{MAX_HANDLE, NUM_DATA_TYPES},
    error::AdvBufferError,
};
use core::ptr::NonNull;
use num_enum::{IntoPrimitive, TryFromPrimitive};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// A valid advertising set handle.
pub struct AdvHandle(u8);

impl AdvHandle {
    /// Wrap a raw handle.
    ///
    /// # Errors
    ///
    /// Returns `AdvBufferError::InvalidHandle` for the unused sentinel and for
    /// any value above `MAX_HANDLE`.
    pub const fn new(raw: u8) -> Result<Self, AdvBufferError> {
        if raw > MAX_HANDLE {
            return Err(AdvBufferError::InvalidHandle(raw));
        }
        Ok(Self(raw))
    }

    #[must_use]
    #[inline]
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for AdvHandle {
    type Error = AdvBufferError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AdvHandle> for u8 {
    fn from(handle: AdvHandle) -> Self {
        handle.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[num_enum(error_type(name = AdvBufferError, constructor = DataType::invalid))]
#[repr(u8)]
/// Kind of payload attached to an advertising set.
pub enum DataType {
    Adv = 0,
    ScanResp = 1,
    PeriodicAdv = 2,
}

impl DataType {
    /// All data types, in table order.
    pub const ALL: [Self; NUM_DATA_TYPES] = [Self::Adv, Self::ScanResp, Self::PeriodicAdv];

    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    const fn invalid(value: u8) -> AdvBufferError {
        AdvBufferError::InvalidDataType(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// A heap buffer handed to the link layer.
pub struct Buffer {
    pub ptr: NonNull<u8>,
    pub len: usize,
}

impl Buffer {
    #[must_use]
    #[inline]
    pub const fn new(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }
}
