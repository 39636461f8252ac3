//! Build-time configuration.
//!
//! Default values match the reference controller configuration. The number of
//! advertising sets can be changed per instance through the `SETS` parameter
//! of [`AdvBuffers`](crate::AdvBuffers) and [`SlotTable`](crate::SlotTable).

/// Advertising sets supported concurrently.
pub const NUM_ADV_SETS: usize = 2;

/// Advertising data, scan response data and periodic advertising data.
pub const NUM_DATA_TYPES: usize = 3;

/// Upper bound of the advertising data reassembled from fragments.
pub const MAX_ADV_DATA_LENGTH: usize = 1650;

/// Highest advertising handle allowed by the Core specification.
pub const MAX_HANDLE: u8 = 0xEF;

/// Handle value marking a free slot.
pub const UNUSED_HANDLE: u8 = 0xFF;

/// Legacy advertising and scan response payloads.
pub const LEGACY_ADV_DATA_SIZE: usize = 31;

/// Legacy buffers in flight, so that data can be updated during an advertising event.
pub const NUM_LEGACY_BUFFERS: usize = 4;

/// PAwR subevent data.
pub const PAWR_SUBEVENT_DATA_SIZE: usize = 249;
pub const PAWR_SUBEVENT_COUNT: usize = 8;

/// PAwR response data.
pub const PAWR_RESPONSE_DATA_SIZE: usize = 247;
pub const PAWR_RESPONSE_COUNT: usize = 8;

const _: () = assert!(MAX_HANDLE < UNUSED_HANDLE);
const _: () = assert!(PAWR_SUBEVENT_COUNT <= 64 && PAWR_RESPONSE_COUNT <= 64);
