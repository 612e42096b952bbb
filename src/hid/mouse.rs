//! BLE HID mouse report.
//!
//! Layout (7 bytes, report ID 1 of [`crate::ble::BLE_HID_REPORT_MAP`]):
//! ```text
//! Byte 0-1: X displacement (signed 16-bit, little-endian)
//! Byte 2-3: Y displacement (signed 16-bit, little-endian)
//! Byte 4:   Vertical wheel (signed, -127..127)
//! Byte 5:   Horizontal wheel / AC Pan (signed, -127..127)
//! Byte 6:   Button bitfield (bits 0-4 = buttons 1-5)
//! ```

/// Mouse report size in bytes.
pub const MOUSE_REPORT_SIZE: usize = 7;

/// Buttons carried by the report.
pub const MOUSE_BUTTONS: u16 = 5;

/// Mouse report as advertised by the BLE report map.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MouseReport {
    /// Button bitfield (bit 0 = left, bit 1 = right, bit 2 = middle, ...).
    pub buttons: u8,
    /// Relative X movement.
    pub x: i16,
    /// Relative Y movement.
    pub y: i16,
    /// Scroll wheel delta.
    pub wheel: i8,
    /// Horizontal scroll delta.
    pub pan: i8,
}

impl MouseReport {
    /// Create an idle (no movement, no buttons) report.
    pub const fn empty() -> Self {
        Self {
            buttons: 0,
            x: 0,
            y: 0,
            wheel: 0,
            pan: 0,
        }
    }

    /// Press button `usage` (Button page, 1-based).
    ///
    /// Buttons beyond the report's five are ignored.
    pub fn press(&mut self, usage: u16) {
        if (1..=MOUSE_BUTTONS).contains(&usage) {
            self.buttons |= 1 << (usage - 1);
        }
    }

    /// Serialise into a byte slice for BLE HID transmission.
    /// Returns the number of bytes written (always 7).
    pub fn serialize(&self, buf: &mut [u8]) -> usize {
        if buf.len() < MOUSE_REPORT_SIZE {
            return 0;
        }
        buf[0..2].copy_from_slice(&self.x.to_le_bytes());
        buf[2..4].copy_from_slice(&self.y.to_le_bytes());
        buf[4] = self.wheel as u8;
        buf[5] = self.pan as u8;
        buf[6] = self.buttons;
        MOUSE_REPORT_SIZE
    }

    /// Returns `true` when no buttons are pressed and there is no movement.
    pub fn is_idle(&self) -> bool {
        self.buttons == 0 && self.x == 0 && self.y == 0 && self.wheel == 0 && self.pan == 0
    }
}

/// Narrow a decoded value to the 16-bit axis range.
pub fn clamp_axis(value: i32) -> i16 {
    value.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Narrow a decoded value to the 8-bit wheel range.
pub fn clamp_wheel(value: i32) -> i8 {
    value.clamp(-127, 127) as i8
}
