//! Pure suspend policy, kept free of time and collaborators for testing.

/// Connectivity as seen when the inactivity timer fires.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkSnapshot {
    pub usb_device: bool,
    pub ble_peer: bool,
    pub priority_session: bool,
}

/// Why an elapsed inactivity timer does not suspend the output stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Hold {
    SleepDisabled,
    NoUsbDevice,
    NoBlePeer,
    PrioritySession,
}

/// Decide whether the output stack may be suspended.
///
/// Returns the first condition that holds it up, or `None` when all of
/// them allow the suspend.
pub fn suspend_hold(links: LinkSnapshot, sleep_enabled: bool) -> Option<Hold> {
    if !sleep_enabled {
        Some(Hold::SleepDisabled)
    } else if !links.usb_device {
        Some(Hold::NoUsbDevice)
    } else if !links.ble_peer {
        Some(Hold::NoBlePeer)
    } else if links.priority_session {
        Some(Hold::PrioritySession)
    } else {
        None
    }
}

/// Output counts as paused only while a USB device is still there to
/// produce input.
pub fn output_paused(suspended: bool, usb_device: bool) -> bool {
    suspended && usb_device
}

/// Should a delivered report rearm the inactivity timer?
pub fn rearm_on_delivery(links: LinkSnapshot) -> bool {
    links.usb_device && links.ble_peer
}
