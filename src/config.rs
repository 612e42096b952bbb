//! Application-wide constants and compile-time configuration.
//!
//! Capacities, timing parameters and protocol constants live here so
//! they can be tuned in one place. Runtime-adjustable values are in
//! [`crate::settings`].

// USB input

/// Largest raw HID input report we accept (bytes, excluding report ID).
pub const MAX_REPORT_BYTES: usize = 64;

/// Bit-addressable length of one report.
pub const MAX_REPORT_BITS: u32 = (MAX_REPORT_BYTES * 8) as u32;

/// Maximum fields per report map.
pub const MAX_REPORT_FIELDS: usize = 48;

/// Maximum report maps (report ID x direction) per interface.
pub const MAX_REPORTS_PER_INTERFACE: usize = 8;

/// Maximum USB HID interfaces tracked at once.
pub const MAX_INTERFACES: usize = 4;

/// Nesting limit for Collection items. Deeper nesting is capped, not fatal.
pub const MAX_COLLECTION_DEPTH: usize = 8;

/// Explicit Usage items remembered before one Main item.
pub const MAX_USAGES: usize = MAX_REPORT_FIELDS;

// Dispatch

/// Default depth of the producer → consumer report queue.
pub const REPORT_QUEUE_DEPTH: usize = 4;

/// How long the producer may wait for a free queue slot (ms).
pub const ENQUEUE_TIMEOUT_MS: u64 = 100;

/// Translator classification cache entries (interface x report ID).
pub const CLASS_CACHE_SIZE: usize = MAX_INTERFACES * MAX_REPORTS_PER_INTERFACE;

// Lifecycle

/// Bounded wait for the lifecycle lock from the inactivity timer (ms).
pub const TIMER_LOCK_TIMEOUT_MS: u64 = 250;

/// Bounded wait for the lifecycle lock from the report path (ms).
pub const REPORT_LOCK_TIMEOUT_MS: u64 = 25;

/// Inactivity before the BLE stack is suspended (seconds).
pub const DEFAULT_SLEEP_TIMEOUT_SECS: u32 = 30;

/// Suspend feature enabled by default.
pub const DEFAULT_SLEEP_ENABLED: bool = true;

/// Mouse movement scale in percent (100 = unchanged).
pub const DEFAULT_MOUSE_SENSITIVITY: u16 = 100;

/// Accepted mouse sensitivity range (percent).
pub const MOUSE_SENSITIVITY_MIN: u16 = 1;
pub const MOUSE_SENSITIVITY_MAX: u16 = 1000;

// BLE output

/// Report ID of the mouse input report in the BLE report map.
pub const BLE_MOUSE_REPORT_ID: u8 = 1;

/// Report ID of the keyboard input report in the BLE report map.
pub const BLE_KEYBOARD_REPORT_ID: u8 = 2;
