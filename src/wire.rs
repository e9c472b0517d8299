//! Wire codec for the RX/TX ring request and response records.
//!
//! All fields are little-endian. The codec is pure and side-effect free; it
//! never logs. Buffers shorter than the fixed record size are a programmer
//! error (a slot is always sized to the max of the request/response record
//! for its direction), so these functions panic rather than return `Result`.

/// Size in bytes of an RX ring slot (max of request/response record size).
pub const RX_SLOT_SIZE: usize = 8;
/// Size in bytes of a TX ring slot (max of request/response record size).
pub const TX_SLOT_SIZE: usize = 12;

/// TX request flag bits. Only `MORE_DATA` is consulted by this driver;
/// the others are carried for wire compatibility with the back-end.
pub mod tx_flag {
    pub const CSUM_BLANK: u16 = 1;
    pub const DATA_VALIDATED: u16 = 2;
    pub const MORE_DATA: u16 = 4;
    pub const EXTRA_INFO: u16 = 8;
}

/// Encode an RX request: `id: u16, _pad: u16, gref: u32`.
pub fn encode_rx_req(id: u16, gref: u32, slot: &mut [u8]) {
    assert!(slot.len() >= RX_SLOT_SIZE, "RX slot buffer too small");
    slot[0..2].copy_from_slice(&id.to_le_bytes());
    slot[2..4].copy_from_slice(&0u16.to_le_bytes());
    slot[4..8].copy_from_slice(&gref.to_le_bytes());
}

/// Decode an RX response: `id: u16, offset: u16, flags: u16, status: i16`.
pub fn decode_rx_resp(slot: &[u8]) -> (u16, u16, u16, i16) {
    assert!(slot.len() >= RX_SLOT_SIZE, "RX slot buffer too small");
    let id = u16::from_le_bytes([slot[0], slot[1]]);
    let offset = u16::from_le_bytes([slot[2], slot[3]]);
    let flags = u16::from_le_bytes([slot[4], slot[5]]);
    let status = i16::from_le_bytes([slot[6], slot[7]]);
    (id, offset, flags, status)
}

/// Encode a TX request: `gref: u32, offset: u16, flags: u16, id: u16, size: u16`.
#[allow(clippy::too_many_arguments)]
pub fn encode_tx_req(gref: u32, offset: u16, flags: u16, id: u16, size: u16, slot: &mut [u8]) {
    assert!(slot.len() >= TX_SLOT_SIZE, "TX slot buffer too small");
    slot[0..4].copy_from_slice(&gref.to_le_bytes());
    slot[4..6].copy_from_slice(&offset.to_le_bytes());
    slot[6..8].copy_from_slice(&flags.to_le_bytes());
    slot[8..10].copy_from_slice(&id.to_le_bytes());
    slot[10..12].copy_from_slice(&size.to_le_bytes());
}

/// Decode a TX response: `id: u16, status: i16`.
pub fn decode_tx_resp(slot: &[u8]) -> (u16, i16) {
    assert!(slot.len() >= 4, "TX response slot buffer too small");
    let id = u16::from_le_bytes([slot[0], slot[1]]);
    let status = i16::from_le_bytes([slot[2], slot[3]]);
    (id, status)
}
