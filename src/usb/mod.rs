//! USB host side - events from the HID host driver.
//!
//! Enumeration and the interrupt-IN transfers are handled by the
//! platform USB host stack. It reports each HID interface's life cycle
//! to the bridge as a [`UsbHidEvent`]:
//!
//! - `Connected` once the report descriptor has been read
//! - `Report` for every interrupt-IN transfer
//! - `Disconnected` when the interface goes away
//!
//! Event data borrows the driver's buffers; the bridge copies what it
//! keeps before returning.

/// One event from the USB HID host driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UsbHidEvent<'a> {
    /// A HID interface finished enumeration.
    Connected {
        interface_id: u8,
        /// Raw HID report descriptor.
        descriptor: &'a [u8],
    },
    /// An input report arrived.
    Report {
        interface_id: u8,
        /// Report ID as split off by the driver, or `None` to let the
        /// bridge split it according to the interface's descriptor.
        report_id: Option<u8>,
        payload: &'a [u8],
    },
    /// The interface was removed.
    Disconnected { interface_id: u8 },
}

impl UsbHidEvent<'_> {
    pub fn interface_id(&self) -> u8 {
        match *self {
            UsbHidEvent::Connected { interface_id, .. }
            | UsbHidEvent::Report { interface_id, .. }
            | UsbHidEvent::Disconnected { interface_id } => interface_id,
        }
    }
}
