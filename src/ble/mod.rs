//! Bluetooth Low Energy output side.
//!
//! The bridge acts as a BLE HID **peripheral**. Building the GATT table,
//! advertising and pairing belong to the platform stack; this module
//! only defines:
//!
//! 1. **[`OutputStack`]** - the contract the bridge drives: bring the
//!    stack up or down and push input reports to the connected host.
//! 2. **[`BLE_HID_REPORT_MAP`]** - the report map the platform stack
//!    must advertise. The serialised [`MouseReport`] and
//!    [`KeyboardReport`] layouts match it byte for byte.

use crate::config::{BLE_KEYBOARD_REPORT_ID, BLE_MOUSE_REPORT_ID};
use crate::error::BleError;
use crate::hid::{KeyboardReport, MouseReport, OutgoingReport};

/// The platform BLE HID stack, as seen by the bridge.
///
/// All calls are synchronous and may fail; the bridge never retries
/// them on its own.
pub trait OutputStack {
    /// Initialise the stack (controller, GATT server, advertising).
    fn stack_init(&self) -> Result<(), BleError>;

    /// Tear the stack down completely.
    fn stack_deinit(&self) -> Result<(), BleError>;

    /// Notify the host of a keyboard input report (report ID 2).
    fn send_keyboard_report(&self, report: &KeyboardReport) -> Result<(), BleError>;

    /// Notify the host of a mouse input report (report ID 1).
    fn send_mouse_report(&self, report: &MouseReport) -> Result<(), BleError>;

    fn send(&self, report: &OutgoingReport) -> Result<(), BleError> {
        match report {
            OutgoingReport::Keyboard(k) => self.send_keyboard_report(k),
            OutgoingReport::Mouse(m) => self.send_mouse_report(m),
        }
    }
}

/// HID report map exposed over HOGP.
///
/// Report ID 1 is a 7-byte mouse, report ID 2 a boot-layout keyboard
/// with a 5-LED output report.
pub const BLE_HID_REPORT_MAP: &[u8] = &[
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x02, // Usage (Mouse)
    0xA1, 0x01, // Collection (Application)
    0x85, BLE_MOUSE_REPORT_ID, //   Report ID (1)
    0x09, 0x01, //   Usage (Pointer)
    0xA1, 0x00, //   Collection (Physical)
    //
    //   - X, Y (16-bit) -
    0x05, 0x01, //     Usage Page (Generic Desktop)
    0x09, 0x30, //     Usage (X)
    0x09, 0x31, //     Usage (Y)
    0x95, 0x02, //     Report Count (2)
    0x75, 0x10, //     Report Size (16)
    0x16, 0x00, 0x80, // Logical Minimum (-32768)
    0x26, 0xFF, 0x7F, // Logical Maximum (32767)
    0x81, 0x06, //     Input (Data, Variable, Relative)
    //
    //   - Vertical wheel -
    0x09, 0x38, //     Usage (Wheel)
    0x95, 0x01, //     Report Count (1)
    0x75, 0x08, //     Report Size (8)
    0x15, 0x81, //     Logical Minimum (-127)
    0x25, 0x7F, //     Logical Maximum (127)
    0x81, 0x06, //     Input (Data, Variable, Relative)
    //
    //   - Horizontal wheel -
    0x05, 0x0C, //     Usage Page (Consumer)
    0x0A, 0x38, 0x02, // Usage (AC Pan)
    0x95, 0x01, //     Report Count (1)
    0x75, 0x08, //     Report Size (8)
    0x15, 0x81, //     Logical Minimum (-127)
    0x25, 0x7F, //     Logical Maximum (127)
    0x81, 0x06, //     Input (Data, Variable, Relative)
    //
    //   - Buttons (5 bits + 3 padding) -
    0x05, 0x09, //     Usage Page (Buttons)
    0x19, 0x01, //     Usage Minimum (Button 1)
    0x29, 0x05, //     Usage Maximum (Button 5)
    0x95, 0x05, //     Report Count (5)
    0x75, 0x01, //     Report Size (1)
    0x15, 0x00, //     Logical Minimum (0)
    0x25, 0x01, //     Logical Maximum (1)
    0x81, 0x02, //     Input (Data, Variable, Absolute)
    0x95, 0x01, //     Report Count (1)
    0x75, 0x03, //     Report Size (3)
    0x81, 0x01, //     Input (Constant) - padding
    0xC0, //   End Collection (Physical)
    0xC0, // End Collection (Application)
    //
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x06, // Usage (Keyboard)
    0xA1, 0x01, // Collection (Application)
    0x85, BLE_KEYBOARD_REPORT_ID, //   Report ID (2)
    //
    //   - Modifier keys (8 bits) -
    0x05, 0x07, //   Usage Page (Keyboard/Keypad)
    0x19, 0xE0, //   Usage Minimum (Left Control)
    0x29, 0xE7, //   Usage Maximum (Right GUI)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x75, 0x01, //   Report Size (1)
    0x95, 0x08, //   Report Count (8)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    //
    //   - Reserved byte -
    0x95, 0x01, //   Report Count (1)
    0x75, 0x08, //   Report Size (8)
    0x81, 0x01, //   Input (Constant)
    //
    //   - LED output (5 bits + 3 padding) -
    0x05, 0x08, //   Usage Page (LEDs)
    0x19, 0x01, //   Usage Minimum (Num Lock)
    0x29, 0x05, //   Usage Maximum (Kana)
    0x95, 0x05, //   Report Count (5)
    0x75, 0x01, //   Report Size (1)
    0x91, 0x02, //   Output (Data, Variable, Absolute)
    0x95, 0x01, //   Report Count (1)
    0x75, 0x03, //   Report Size (3)
    0x91, 0x01, //   Output (Constant)
    //
    //   - Key codes (6 bytes) -
    0x05, 0x07, //   Usage Page (Keyboard/Keypad)
    0x19, 0x00, //   Usage Minimum (0)
    0x29, 0x65, //   Usage Maximum (101)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x65, //   Logical Maximum (101)
    0x95, 0x06, //   Report Count (6)
    0x75, 0x08, //   Report Size (8)
    0x81, 0x00, //   Input (Data, Array)
    0xC0, // End Collection
];
