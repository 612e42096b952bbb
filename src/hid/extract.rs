//! Bit-level field extraction from raw report payloads.

/// Read `bit_size` bits starting at `bit_offset` (LSB first) and
/// sign-extend from the field's top bit.
///
/// The sign extension depends only on the width, not on the field's
/// logical range, so a 1-bit field holding 1 reads back as -1 and an
/// unsigned 8-bit 0xFF reads as -1. Callers that want the raw bits use
/// [`extract_unsigned`].
///
/// Bytes past the end of `payload` read as zero. `bit_size` of 0 or
/// above 32 yields 0.
pub fn extract_field(payload: &[u8], bit_offset: u16, bit_size: u16) -> i32 {
    if bit_size == 0 || bit_size > 32 {
        return 0;
    }

    let raw = extract_unsigned(payload, bit_offset, bit_size);
    if bit_size < 32 && raw & (1 << (bit_size - 1)) != 0 {
        (raw | !((1u32 << bit_size) - 1)) as i32
    } else {
        raw as i32
    }
}

/// Like [`extract_field`] without sign extension.
pub fn extract_unsigned(payload: &[u8], bit_offset: u16, bit_size: u16) -> u32 {
    if bit_size == 0 || bit_size > 32 {
        return 0;
    }

    let mut value: u32 = 0;
    let mut byte_index = (bit_offset / 8) as usize;
    let mut shift = (bit_offset % 8) as u32;
    let mut filled: u32 = 0;
    let wanted = bit_size as u32;

    while filled < wanted {
        let byte = payload.get(byte_index).copied().unwrap_or(0) as u32;
        let take = (8 - shift).min(wanted - filled);
        let bits = (byte >> shift) & ((1 << take) - 1);
        value |= bits << filled;

        filled += take;
        byte_index += 1;
        shift = 0;
    }

    value
}
