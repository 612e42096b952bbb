//! Unified error type for usb2ble.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data.
//! Implements `defmt::Format` for efficient on-target logging.

/// Top-level error type used across the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    // USB input
    /// No report map is stored for this interface.
    UnknownInterface,

    /// The interface has no Input report with this report ID.
    UnknownReport,

    /// Raw report payload is longer than the 64-byte report buffer.
    ReportTooLong,

    /// Every interface slot already holds a report map.
    InterfaceTableFull,

    // Dispatch
    /// The report queue stayed full past the enqueue timeout.
    QueueFull,

    /// Decoded field count disagrees with the current report map.
    FieldCountMismatch,

    /// The report was decoded against a map that has since been replaced.
    StaleReport,

    // Lifecycle
    /// The lifecycle lock could not be acquired in time.
    LockTimeout,

    // BLE output
    /// The BLE output stack returned an error.
    Ble(BleError),

    // Settings
    /// The settings key is not recognised.
    UnknownSetting,

    /// The settings value is out of range or of the wrong type.
    InvalidSetting,
}

/// Subset of BLE output errors we propagate (keeps the enum `Copy`-friendly).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BleError {
    /// Raw error code from the BLE stack.
    Raw(i32),
    /// Bringing the stack up failed.
    InitFailed,
    /// Tearing the stack down failed.
    DeinitFailed,
    /// No host is connected, nothing was sent.
    NotConnected,
}

// Convenience conversions

impl From<BleError> for Error {
    fn from(e: BleError) -> Self {
        Error::Ble(e)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::UnknownInterface => f.write_str("no report map for interface"),
            Error::UnknownReport => f.write_str("unknown report id"),
            Error::ReportTooLong => f.write_str("report exceeds 64 bytes"),
            Error::InterfaceTableFull => f.write_str("interface table full"),
            Error::QueueFull => f.write_str("report queue full"),
            Error::FieldCountMismatch => f.write_str("field count mismatch"),
            Error::StaleReport => f.write_str("stale report map"),
            Error::LockTimeout => f.write_str("lifecycle lock timeout"),
            Error::Ble(e) => write!(f, "ble stack error: {:?}", e),
            Error::UnknownSetting => f.write_str("unknown setting"),
            Error::InvalidSetting => f.write_str("invalid setting value"),
        }
    }
}
