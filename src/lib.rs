//! usb2ble - USB HID to BLE HID bridge core.
//!
//! Parses the report descriptor of any attached USB HID device, decodes
//! its input reports bit by bit and re-emits them as canonical keyboard
//! and mouse reports over a BLE HID profile. The BLE stack is suspended
//! when input goes quiet and brought back by the next report.
//!
//! The crate is `no_std` and allocation-free. USB host, BLE stack,
//! connectivity and settings storage are collaborators behind the
//! traits in [`ble`], [`power`] and [`settings`].
//!
//! Host tests: `cargo test` (enables the `std` features of
//! embassy-sync/embassy-time through dev-dependencies).

#![cfg_attr(not(test), no_std)]

// Must come first so the logging macros are visible to every module.
mod fmt;

pub mod ble;
pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod hid;
pub mod power;
pub mod power_logic;
pub mod settings;
pub mod usb;

pub use bridge::{Bridge, Delivery};
pub use dispatch::{DecodedField, DecodedReport, DispatchStats, Dispatcher};
pub use error::{BleError, Error};
pub use hid::{InterfaceReports, OutgoingReport, ReportMap, Translator};
pub use power::{LifecycleState, LinkStatus, PowerManager, TimerOutcome};
pub use settings::{BridgeSettings, SettingValue, SettingsStore};
pub use usb::UsbHidEvent;
