//! HID report types and the USB → BLE translation layer.

pub mod descriptor;
pub mod extract;
pub mod keyboard;
pub mod mouse;
pub mod translate;


pub use descriptor::{FieldDescriptor, FieldFlags, InterfaceReports, ReportKind, ReportMap};
pub use extract::{extract_field, extract_unsigned};
pub use keyboard::KeyboardReport;
pub use mouse::MouseReport;
pub use translate::{classify, MapLookup, MapSummary, ReportClass, Translator};

/// Usage page codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UsagePage {
    /// Generic Desktop (mouse, keyboard, joystick).
    GenericDesktop,
    /// Keyboard/Keypad.
    Keyboard,
    /// LEDs.
    Led,
    /// Button.
    Button,
    /// Consumer Control.
    Consumer,
    /// Unknown/unsupported.
    Unknown(u16),
}

impl From<u16> for UsagePage {
    fn from(code: u16) -> Self {
        match code {
            0x01 => UsagePage::GenericDesktop,
            0x07 => UsagePage::Keyboard,
            0x08 => UsagePage::Led,
            0x09 => UsagePage::Button,
            0x0C => UsagePage::Consumer,
            other => UsagePage::Unknown(other),
        }
    }
}

/// Generic Desktop usage codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DesktopUsage {
    Pointer,
    Mouse,
    Keyboard,
    Keypad,
    X,
    Y,
    Wheel,
    Unknown(u16),
}

impl From<u16> for DesktopUsage {
    fn from(code: u16) -> Self {
        match code {
            0x01 => DesktopUsage::Pointer,
            0x02 => DesktopUsage::Mouse,
            0x06 => DesktopUsage::Keyboard,
            0x07 => DesktopUsage::Keypad,
            0x30 => DesktopUsage::X,
            0x31 => DesktopUsage::Y,
            0x38 => DesktopUsage::Wheel,
            other => DesktopUsage::Unknown(other),
        }
    }
}

/// Consumer page "AC Pan" (horizontal scroll).
pub const CONSUMER_AC_PAN: u16 = 0x0238;

/// Canonical report produced by the translator for the BLE side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OutgoingReport {
    Keyboard(KeyboardReport),
    Mouse(MouseReport),
}

impl OutgoingReport {
    pub fn serialize(&self, buf: &mut [u8]) -> usize {
        match self {
            OutgoingReport::Keyboard(k) => k.serialize(buf),
            OutgoingReport::Mouse(m) => m.serialize(buf),
        }
    }
}
