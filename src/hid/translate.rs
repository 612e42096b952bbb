//! Protocol translator: decoded USB reports → canonical BLE reports.
//!
//! Each Input report map is classified once (keyboard, mouse or
//! neither) and the result is cached per interface and report ID.
//! Decoded reports are then composed field by field into the fixed
//! boot-style keyboard layout or the BLE mouse layout.

use heapless::LinearMap;

use super::extract::extract_unsigned;
use super::keyboard::KeyboardReport;
use super::mouse::{clamp_axis, clamp_wheel, MouseReport};
use super::{DesktopUsage, FieldDescriptor, OutgoingReport, ReportMap, UsagePage, CONSUMER_AC_PAN};
use crate::config::{CLASS_CACHE_SIZE, DEFAULT_MOUSE_SENSITIVITY};
use crate::dispatch::DecodedReport;
use crate::error::Error;

/// What a report map carries, as far as the BLE side is concerned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReportClass {
    Keyboard,
    Mouse,
    /// Nothing we forward (vendor, consumer-only, gamepad, ...).
    Unsupported,
}

/// Classification of one Input map, tagged with the map generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MapSummary {
    pub generation: u32,
    pub class: ReportClass,
    pub field_count: usize,
}

/// Read access to the shared report map table.
pub trait MapLookup {
    /// Generation of the maps currently stored for `interface_id`.
    fn generation(&self, interface_id: u8) -> Option<u32>;

    /// Classify the current Input map of `report_id` on `interface_id`.
    fn summary(&self, interface_id: u8, report_id: u8) -> Option<MapSummary>;
}

/// Classify a report map by the usages of its data fields.
///
/// Keyboard wins over mouse: any Keyboard/Keypad page field, or Button
/// page fields inside a Generic Desktop Keyboard application, make it a
/// keyboard report. X/Y/Wheel fields otherwise make it a mouse, and so
/// do Button fields in a pointer context: a Mouse or Pointer application,
/// or no application collection at all.
pub fn classify(map: &ReportMap) -> ReportClass {
    let desktop_application = map
        .application()
        .filter(|&(page, _)| UsagePage::from(page) == UsagePage::GenericDesktop)
        .map(|(_, usage)| DesktopUsage::from(usage));
    let keyboard_context = matches!(
        desktop_application,
        Some(DesktopUsage::Keyboard | DesktopUsage::Keypad)
    );
    let pointer_context = map.application().is_none()
        || matches!(
            desktop_application,
            Some(DesktopUsage::Mouse | DesktopUsage::Pointer)
        );

    let mut has_keys = false;
    let mut has_buttons = false;
    let mut has_axes = false;

    for field in map.fields().iter().filter(|f| !f.flags.constant) {
        match UsagePage::from(field.usage_page) {
            UsagePage::Keyboard => has_keys = true,
            UsagePage::Button => has_buttons = true,
            UsagePage::GenericDesktop => {
                if matches!(
                    DesktopUsage::from(field.usage),
                    DesktopUsage::X | DesktopUsage::Y | DesktopUsage::Wheel
                ) {
                    has_axes = true;
                }
            }
            _ => {}
        }
    }

    if has_keys || (has_buttons && keyboard_context) {
        ReportClass::Keyboard
    } else if has_axes || (has_buttons && pointer_context) {
        ReportClass::Mouse
    } else {
        ReportClass::Unsupported
    }
}

/// Usages selected by the elements of an array field.
///
/// Each element is `report_size` bits, read unsigned. Zero and
/// out-of-range indices select nothing.
fn array_usages<'a>(field: &'a FieldDescriptor, raw: &'a [u8]) -> impl Iterator<Item = u16> + 'a {
    let size = field.report_size;
    (0..field.report_count).filter_map(move |j| {
        let offset = field.bit_offset.checked_add(j.checked_mul(size)?)?;
        let index = extract_unsigned(raw, offset, size) as i64;
        if index == 0 {
            return None;
        }
        let min = field.logical_min as i64;
        let max = field.logical_max as i64;
        if index < min || (max >= min && index > max) {
            return None;
        }
        let usage = field.usage as i64 + (index - min);
        (usage <= field.usage_maximum as i64).then_some(usage as u16)
    })
}

/// Compose a keyboard report from the Keyboard/Keypad page fields.
pub fn compose_keyboard(report: &DecodedReport) -> KeyboardReport {
    let mut keyboard = KeyboardReport::empty();

    for decoded in report.fields.iter() {
        let field = &decoded.field;
        if field.flags.constant || UsagePage::from(field.usage_page) != UsagePage::Keyboard {
            continue;
        }

        if field.is_usage_array() && field.usage != field.usage_maximum {
            for usage in array_usages(field, &report.raw) {
                if !keyboard.press(usage) {
                    trace!("Key 0x{:x} dropped, all slots taken", usage);
                }
            }
        } else if decoded.value != 0 && !keyboard.press(field.usage) {
            trace!("Key 0x{:x} dropped, all slots taken", field.usage);
        }
    }

    keyboard
}

/// Compose a mouse report. X/Y are scaled by `sensitivity` percent.
pub fn compose_mouse(report: &DecodedReport, sensitivity: u16) -> MouseReport {
    let mut mouse = MouseReport::empty();
    let (mut x, mut y, mut wheel, mut pan) = (0i32, 0i32, 0i32, 0i32);

    for decoded in report.fields.iter() {
        let field = &decoded.field;
        if field.flags.constant {
            continue;
        }

        match UsagePage::from(field.usage_page) {
            UsagePage::GenericDesktop => match DesktopUsage::from(field.usage) {
                DesktopUsage::X => x = decoded.value,
                DesktopUsage::Y => y = decoded.value,
                DesktopUsage::Wheel => wheel = decoded.value,
                _ => {}
            },
            UsagePage::Button => {
                if field.is_usage_array() && field.usage != field.usage_maximum {
                    for usage in array_usages(field, &report.raw) {
                        mouse.press(usage);
                    }
                } else if decoded.value != 0 {
                    mouse.press(field.usage);
                }
            }
            UsagePage::Consumer if field.usage == CONSUMER_AC_PAN => pan = decoded.value,
            _ => {}
        }
    }

    let scale = |v: i32| -> i32 {
        if sensitivity == DEFAULT_MOUSE_SENSITIVITY {
            v
        } else {
            (v as i64 * sensitivity as i64 / 100).clamp(i32::MIN as i64, i32::MAX as i64) as i32
        }
    };

    mouse.x = clamp_axis(scale(x));
    mouse.y = clamp_axis(scale(y));
    mouse.wheel = clamp_wheel(wheel);
    mouse.pan = clamp_wheel(pan);
    mouse
}

/// Stateful translator owned by the consumer task.
pub struct Translator {
    cache: LinearMap<(u8, u8), MapSummary, CLASS_CACHE_SIZE>,
    sensitivity: u16,
}

impl Default for Translator {
    fn default() -> Self {
        Self::new(DEFAULT_MOUSE_SENSITIVITY)
    }
}

impl Translator {
    pub fn new(sensitivity: u16) -> Self {
        Self {
            cache: LinearMap::new(),
            sensitivity,
        }
    }

    pub fn sensitivity(&self) -> u16 {
        self.sensitivity
    }

    pub fn set_sensitivity(&mut self, sensitivity: u16) {
        self.sensitivity = sensitivity;
    }

    /// Cached classification for a report, if any.
    pub fn cached(&self, interface_id: u8, report_id: u8) -> Option<MapSummary> {
        self.cache.get(&(interface_id, report_id)).copied()
    }

    /// Translate one decoded report.
    ///
    /// `Ok(None)` means the report is valid but carries nothing we
    /// forward. Reports decoded against a replaced map, or whose field
    /// count disagrees with the map, are rejected.
    pub fn translate<M: MapLookup>(
        &mut self,
        report: &DecodedReport,
        maps: &M,
    ) -> Result<Option<OutgoingReport>, Error> {
        let current = maps
            .generation(report.interface_id)
            .ok_or(Error::UnknownInterface)?;
        if current != report.generation {
            return Err(Error::StaleReport);
        }

        let summary = self.summary(report, maps)?;
        if summary.field_count != report.fields.len() {
            warn!(
                "Unexpected number of fields: expected={}, got={}",
                summary.field_count,
                report.fields.len()
            );
            return Err(Error::FieldCountMismatch);
        }

        Ok(match summary.class {
            ReportClass::Keyboard => Some(OutgoingReport::Keyboard(compose_keyboard(report))),
            ReportClass::Mouse => Some(OutgoingReport::Mouse(compose_mouse(
                report,
                self.sensitivity,
            ))),
            ReportClass::Unsupported => None,
        })
    }

    fn summary<M: MapLookup>(&mut self, report: &DecodedReport, maps: &M) -> Result<MapSummary, Error> {
        let key = (report.interface_id, report.report_id);
        if let Some(cached) = self.cache.get(&key) {
            if cached.generation == report.generation {
                return Ok(*cached);
            }
        }

        let summary = maps
            .summary(report.interface_id, report.report_id)
            .ok_or(Error::UnknownReport)?;
        if summary.generation != report.generation {
            return Err(Error::StaleReport);
        }

        debug!(
            "Interface {} report {} classified as {:?}",
            report.interface_id, report.report_id, summary.class
        );
        if self.cache.insert(key, summary).is_err() {
            // Full of entries for departed devices.
            self.cache.clear();
            let _ = self.cache.insert(key, summary);
        }
        Ok(summary)
    }
}
