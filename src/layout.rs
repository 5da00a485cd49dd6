// layout.rs — byte-offset constants for the message-buffer wire format.
//
// Every magic number used by the codec or the locator is named here instead
// of scattered through the match arms that use it.

/// Size in bytes of one decoded message entry.
pub const ENTRY_SIZE: usize = 64;

/// The 10-byte anchor that always precedes a live buffer.
pub const SIGNATURE: [u8; 10] = [0x00, 0x88, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];

// ============================================================
// EventEntry field offsets (within one 64-byte entry)
// ============================================================

pub const OFF_HAND_ID: usize = 0x00; // u64 LE
pub const OFF_SEQUENCE: usize = 0x08; // u32 LE
pub const OFF_MSG_TYPE: usize = 0x14; // u8
pub const OFF_SEAT_INDEX: usize = 0x16; // u8
pub const OFF_ACTION_CODE: usize = 0x17; // u8
pub const OFF_AMOUNT: usize = 0x18; // u16 LE
pub const OFF_NAME_PTR: usize = 0x1C; // u32 LE
pub const OFF_NAME_LEN: usize = 0x20; // u32 LE
pub const OFF_NAME_CAPACITY: usize = 0x24; // u32 LE, recorded but ignored
pub const OFF_EXTRA_PTR: usize = 0x28; // u32 LE
pub const OFF_EXTRA_LEN: usize = 0x2C; // u32 LE

/// Sentinel seat index denoting a table-level event (no seat).
pub const SEAT_TABLE: u8 = 0xFF;

/// Message type tags (§3.2).
pub const MSG_NEW_HAND: u8 = 0x0A;
pub const MSG_ACTION: u8 = 0x01;
pub const MSG_SEATED: u8 = 0x02;
pub const MSG_ACTION_START: u8 = 0x07;
pub const MSG_DEAL: u8 = 0x05;
pub const MSG_WIN: u8 = 0x06;

/// Action codes, meaningful only when `msg_type == MSG_ACTION` (§3.3).
pub const ACT_BET: u8 = 0x42;
pub const ACT_CALL: u8 = 0x43;
pub const ACT_RAISE: u8 = 0x45;
pub const ACT_FOLD: u8 = 0x46;
pub const ACT_POST_BB: u8 = 0x50;
pub const ACT_POST_SB: u8 = 0x70;
pub const ACT_CHECK: u8 = 0x63;
pub const ACT_WIN: u8 = 0x77;

/// Valid live hand_id window (§3.1). Values outside this are treated as a
/// false buffer match or a freed entry.
pub const HAND_ID_MIN: u64 = 200_000_000_000;
pub const HAND_ID_MAX: u64 = 300_000_000_000;

// ============================================================
// Container offsets (§4.4)
// ============================================================

/// Offset within the container object of the pointer to the buffer's
/// allocation base (buffer_addr - 8).
pub const CONTAINER_BUF_PTR_OFFSET: usize = 0xE4;

/// Offset (relative to the matched slot) of the structural sentinel used to
/// disambiguate a container hit from an incidental value match.
pub const CONTAINER_SENTINEL_OFFSET: i64 = -4;
pub const CONTAINER_SENTINEL_VALUE: u32 = 0x0000_0001;

/// Bytes before/after a candidate slot compared across two samples to
/// confirm the container neighborhood is stable.
pub const CONTAINER_NEIGHBORHOOD_SIZE: usize = 40;

/// Distance subtracted from buffer_addr to get the allocation base that the
/// container stores.
pub const BUFFER_ALLOC_HEADER: u64 = 8;
