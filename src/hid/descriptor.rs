//! HID Report Descriptor parser.
//!
//! Turns the report descriptor a USB device hands out at enumeration
//! into a set of [`ReportMap`]s: one per report ID and direction, each
//! an ordered list of bit-addressed fields.
//!
//! ## HID Report Descriptor Structure
//!
//! A Report Descriptor is a sequence of short items. Each item starts
//! with a prefix byte `tttt ttss` (tag, type, size class) followed by
//! 0, 1, 2 or 4 little-endian data bytes. Key items:
//! - Global (persist until changed): Usage Page, Logical Min/Max,
//!   Report Size, Report Count, Report ID
//! - Local (cleared after every Main item): Usage, Usage Min/Max
//! - Main: Input, Output, Feature, Collection, End Collection
//!
//! ## Limitations
//!
//! - Push/Pop, units, designators and delimiters are ignored
//! - Feature items are skipped (they never reach the translator)
//! - Long items are stepped over
//! - A truncated item stops the parse; everything before it is kept

use heapless::Vec;

use crate::config::{
    MAX_COLLECTION_DEPTH, MAX_REPORTS_PER_INTERFACE, MAX_REPORT_BITS, MAX_REPORT_FIELDS, MAX_USAGES,
};

// Main item tags
const MAIN_INPUT: u8 = 0x08;
const MAIN_OUTPUT: u8 = 0x09;
const MAIN_COLLECTION: u8 = 0x0A;
const MAIN_FEATURE: u8 = 0x0B;
const MAIN_END_COLLECTION: u8 = 0x0C;

// Global item tags
const GLOBAL_USAGE_PAGE: u8 = 0x00;
const GLOBAL_LOGICAL_MINIMUM: u8 = 0x01;
const GLOBAL_LOGICAL_MAXIMUM: u8 = 0x02;
const GLOBAL_REPORT_SIZE: u8 = 0x07;
const GLOBAL_REPORT_ID: u8 = 0x08;
const GLOBAL_REPORT_COUNT: u8 = 0x09;

// Local item tags
const LOCAL_USAGE: u8 = 0x00;
const LOCAL_USAGE_MINIMUM: u8 = 0x01;
const LOCAL_USAGE_MAXIMUM: u8 = 0x02;

/// Long item prefix (`bTag = 0xF`, `bType = 3`, `bSize = 2`).
const LONG_ITEM_PREFIX: u8 = 0xFE;

/// Collection type byte for an Application collection.
const COLLECTION_APPLICATION: u32 = 0x01;

/// Widest data unit the extractor can read.
const MAX_FIELD_BITS: u32 = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ItemType {
    Main,
    Global,
    Local,
    Reserved,
}

/// One decoded short item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Item {
    item_type: ItemType,
    tag: u8,
    /// Number of data bytes (0, 1, 2 or 4).
    size: u8,
    data: u32,
}

impl Item {
    /// Data as a signed value, sign-extended from the item's own width.
    fn signed(&self) -> i32 {
        match self.size {
            1 if self.data & 0x80 != 0 => self.data as u8 as i8 as i32,
            2 if self.data & 0x8000 != 0 => self.data as u16 as i16 as i32,
            _ => self.data as i32,
        }
    }
}

/// Iterator over the short items of a descriptor.
///
/// Stops at the first item whose declared size runs past the end of
/// the buffer.
struct Items<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Items<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl Iterator for Items<'_> {
    type Item = Item;

    fn next(&mut self) -> Option<Item> {
        loop {
            let prefix = *self.data.get(self.pos)?;

            if prefix == LONG_ITEM_PREFIX {
                let size = *self.data.get(self.pos + 1)? as usize;
                let end = self.pos + 3 + size;
                if end > self.data.len() {
                    warn!("HID descriptor: truncated long item at offset {}", self.pos);
                    return None;
                }
                self.pos = end;
                continue;
            }

            let size = match prefix & 0x03 {
                3 => 4,
                n => n as usize,
            };
            let Some(body) = self.data.get(self.pos + 1..self.pos + 1 + size) else {
                warn!(
                    "HID descriptor: item at offset {} needs {} bytes, {} left",
                    self.pos,
                    size,
                    self.data.len() - self.pos - 1
                );
                return None;
            };

            let data = body
                .iter()
                .enumerate()
                .fold(0u32, |acc, (i, &b)| acc | (b as u32) << (i * 8));

            self.pos += 1 + size;

            let item_type = match (prefix >> 2) & 0x03 {
                0 => ItemType::Main,
                1 => ItemType::Global,
                2 => ItemType::Local,
                _ => ItemType::Reserved,
            };

            return Some(Item {
                item_type,
                tag: prefix >> 4,
                size: size as u8,
                data,
            });
        }
    }
}

/// Global parse state. Persists across Main items.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct GlobalState {
    usage_page: u16,
    logical_min: i32,
    logical_max: i32,
    /// Bits per unit.
    report_size: u32,
    /// Number of units.
    report_count: u32,
    /// 0 = no report ID.
    report_id: u8,
}

/// Local parse state. Applies to the next Main item only.
#[derive(Clone, Debug, Default)]
struct LocalState {
    usages: Vec<u16, MAX_USAGES>,
    /// Last Usage seen. Survives the per-item reset.
    current_usage: u16,
    usage_minimum: u16,
    usage_maximum: u16,
    has_usage_range: bool,
}

impl LocalState {
    fn reset(&mut self) {
        self.usages.clear();
        self.usage_minimum = 0;
        self.usage_maximum = 0;
        self.has_usage_range = false;
    }

    /// Usage for the `j`-th unit of an item without a usage range.
    fn usage_for(&self, j: usize) -> u16 {
        match self.usages.get(j) {
            Some(&usage) => usage,
            None => self.usages.last().copied().unwrap_or(self.current_usage),
        }
    }

    fn range_len(&self) -> u32 {
        self.usage_maximum.saturating_sub(self.usage_minimum) as u32 + 1
    }
}

/// An open Collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Collection {
    /// Raw collection type byte (0x00 physical, 0x01 application, ...).
    kind: u32,
    usage_page: u16,
    usage: u16,
}

/// Main item data bits relevant to translation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FieldFlags {
    /// Constant (padding) data.
    pub constant: bool,
    /// One bit field per usage (clear = array of indices).
    pub variable: bool,
    /// Relative (delta) values.
    pub relative: bool,
    /// Array field (indices into the usage range).
    pub array: bool,
}

impl FieldFlags {
    fn from_main(data: u32) -> Self {
        let variable = data & 0x02 != 0;
        Self {
            constant: data & 0x01 != 0,
            variable,
            relative: data & 0x04 != 0,
            array: !variable,
        }
    }

    fn padding() -> Self {
        Self {
            constant: true,
            ..Self::default()
        }
    }
}

/// Direction of a report map.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReportKind {
    Input,
    Output,
}

/// One bit-addressed field of a report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FieldDescriptor {
    pub usage_page: u16,
    /// Usage, or the range minimum for array fields. 0 for padding.
    pub usage: u16,
    /// Range maximum for array fields, otherwise equal to `usage`.
    pub usage_maximum: u16,
    pub report_size: u16,
    pub report_count: u16,
    pub logical_min: i32,
    pub logical_max: i32,
    pub flags: FieldFlags,
    /// Offset from the start of the payload (report ID byte excluded).
    pub bit_offset: u16,
    pub bit_size: u16,
}

impl FieldDescriptor {
    /// `true` for array fields that carry a usage range.
    pub fn is_usage_array(&self) -> bool {
        self.flags.array && !self.flags.constant
    }

    /// Does `usage` fall inside this field's usages?
    pub fn covers(&self, usage: u16) -> bool {
        (self.usage..=self.usage_maximum).contains(&usage)
    }
}

/// Field layout of one report ID in one direction.
///
/// Fields are stored in descriptor order, contiguous and non-overlapping,
/// starting at bit 0 of the payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportMap {
    report_id: u8,
    kind: ReportKind,
    fields: Vec<FieldDescriptor, MAX_REPORT_FIELDS>,
    total_bits: u16,
    /// (usage page, usage) of the enclosing Application collection.
    application: Option<(u16, u16)>,
}

impl ReportMap {
    fn new(report_id: u8, kind: ReportKind, application: Option<(u16, u16)>) -> Self {
        Self {
            report_id,
            kind,
            fields: Vec::new(),
            total_bits: 0,
            application,
        }
    }

    pub fn report_id(&self) -> u8 {
        self.report_id
    }

    pub fn kind(&self) -> ReportKind {
        self.kind
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn total_bits(&self) -> u16 {
        self.total_bits
    }

    /// Payload length in whole bytes.
    pub fn total_bytes(&self) -> usize {
        (self.total_bits as usize).div_ceil(8)
    }

    pub fn application(&self) -> Option<(u16, u16)> {
        self.application
    }

    /// Append `field` at the current end of the map, `bits` wide.
    ///
    /// Returns `false` (and leaves the map untouched) if the field does
    /// not fit in the field table or the 64-byte report.
    fn append(&mut self, mut field: FieldDescriptor, bits: u32) -> bool {
        let Some(end) = (self.total_bits as u32).checked_add(bits) else {
            return false;
        };
        if end > MAX_REPORT_BITS || self.fields.is_full() {
            return false;
        }
        field.bit_offset = self.total_bits;
        field.bit_size = bits as u16;
        if self.fields.push(field).is_err() {
            return false;
        }
        self.total_bits = end as u16;
        true
    }

    /// Advance the bit cursor without emitting a field.
    fn skip(&mut self, bits: u32) {
        let end = (self.total_bits as u32)
            .saturating_add(bits)
            .min(MAX_REPORT_BITS);
        self.total_bits = end as u16;
    }
}

/// All report maps of one USB HID interface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceReports {
    interface_id: u8,
    maps: Vec<ReportMap, MAX_REPORTS_PER_INTERFACE>,
    uses_report_ids: bool,
}

impl InterfaceReports {
    /// Parse a HID Report Descriptor.
    ///
    /// Never fails: unknown tags are ignored and a truncated item ends
    /// the parse with everything decoded so far.
    pub fn parse(descriptor: &[u8], interface_id: u8) -> Self {
        let mut parser = Parser::new(interface_id);
        for item in Items::new(descriptor) {
            parser.item(item);
        }

        let reports = parser.reports;
        for map in reports.maps.iter() {
            info!(
                "Interface {} report {} ({:?}): {} fields, {} bits",
                interface_id,
                map.report_id,
                map.kind,
                map.fields.len(),
                map.total_bits
            );
        }
        reports
    }

    pub fn interface_id(&self) -> u8 {
        self.interface_id
    }

    /// Does the device prefix its reports with a report ID byte?
    pub fn uses_report_ids(&self) -> bool {
        self.uses_report_ids
    }

    pub fn maps(&self) -> impl Iterator<Item = &ReportMap> {
        self.maps.iter()
    }

    /// Input map for `report_id`.
    ///
    /// Devices without report IDs have a single map under ID 0; any ID
    /// passed for them resolves to it.
    pub fn input(&self, report_id: u8) -> Option<&ReportMap> {
        self.find(report_id, ReportKind::Input)
    }

    /// Output map for `report_id`.
    pub fn output(&self, report_id: u8) -> Option<&ReportMap> {
        self.find(report_id, ReportKind::Output)
    }

    /// Number of Input fields expected for `report_id` (0 if unknown).
    pub fn field_count(&self, report_id: u8) -> usize {
        self.input(report_id).map_or(0, ReportMap::len)
    }

    /// Split a raw interrupt transfer into report ID and payload.
    pub fn split_report<'a>(&self, raw: &'a [u8]) -> (u8, &'a [u8]) {
        match raw.split_first() {
            Some((&id, payload)) if self.uses_report_ids => (id, payload),
            _ => (0, raw),
        }
    }

    fn find(&self, report_id: u8, kind: ReportKind) -> Option<&ReportMap> {
        let report_id = if self.uses_report_ids { report_id } else { 0 };
        self.maps
            .iter()
            .find(|m| m.report_id == report_id && m.kind == kind)
    }

    fn map_mut(
        &mut self,
        report_id: u8,
        kind: ReportKind,
        application: Option<(u16, u16)>,
    ) -> Option<&mut ReportMap> {
        let index = match self
            .maps
            .iter()
            .position(|m| m.report_id == report_id && m.kind == kind)
        {
            Some(index) => index,
            None => {
                if self
                    .maps
                    .push(ReportMap::new(report_id, kind, application))
                    .is_err()
                {
                    warn!(
                        "Too many reports for interface {} (report {} dropped)",
                        self.interface_id, report_id
                    );
                    return None;
                }
                self.maps.len() - 1
            }
        };
        self.maps.get_mut(index)
    }
}

struct Parser {
    global: GlobalState,
    local: LocalState,
    collections: Vec<Collection, MAX_COLLECTION_DEPTH>,
    /// Collections opened past the depth cap, still awaiting End Collection.
    overflow: usize,
    reports: InterfaceReports,
}

impl Parser {
    fn new(interface_id: u8) -> Self {
        Self {
            global: GlobalState::default(),
            local: LocalState::default(),
            collections: Vec::new(),
            overflow: 0,
            reports: InterfaceReports {
                interface_id,
                maps: Vec::new(),
                uses_report_ids: false,
            },
        }
    }

    fn item(&mut self, item: Item) {
        match item.item_type {
            ItemType::Main => {
                self.main(item);
                self.local.reset();
            }
            ItemType::Global => self.global(item),
            ItemType::Local => self.local(item),
            ItemType::Reserved => {}
        }
    }

    fn global(&mut self, item: Item) {
        match item.tag {
            GLOBAL_USAGE_PAGE => self.global.usage_page = item.data as u16,
            GLOBAL_LOGICAL_MINIMUM => self.global.logical_min = item.signed(),
            GLOBAL_LOGICAL_MAXIMUM => self.global.logical_max = item.signed(),
            GLOBAL_REPORT_SIZE => self.global.report_size = item.data,
            GLOBAL_REPORT_COUNT => self.global.report_count = item.data,
            GLOBAL_REPORT_ID => {
                self.global.report_id = item.data as u8;
                if self.global.report_id != 0 {
                    self.reports.uses_report_ids = true;
                }
            }
            _ => {}
        }
    }

    fn local(&mut self, item: Item) {
        match item.tag {
            LOCAL_USAGE => {
                let usage = item.data as u16;
                // Excess usages are dropped; the last one still becomes current.
                let _ = self.local.usages.push(usage);
                self.local.current_usage = usage;
            }
            LOCAL_USAGE_MINIMUM => {
                self.local.usage_minimum = item.data as u16;
                self.local.has_usage_range = true;
            }
            LOCAL_USAGE_MAXIMUM => {
                self.local.usage_maximum = item.data as u16;
                self.local.has_usage_range = true;
            }
            _ => {}
        }
    }

    fn main(&mut self, item: Item) {
        match item.tag {
            MAIN_INPUT => self.emit(ReportKind::Input, item.data),
            MAIN_OUTPUT => self.emit(ReportKind::Output, item.data),
            MAIN_FEATURE => {}
            MAIN_COLLECTION => {
                let collection = Collection {
                    kind: item.data,
                    usage_page: self.global.usage_page,
                    usage: self.local.usage_for(0),
                };
                if self.collections.push(collection).is_err() {
                    self.overflow += 1;
                }
            }
            MAIN_END_COLLECTION => {
                if self.overflow > 0 {
                    self.overflow -= 1;
                } else {
                    self.collections.pop();
                }
            }
            _ => {}
        }
    }

    /// Innermost open Application collection.
    fn application(&self) -> Option<(u16, u16)> {
        self.collections
            .iter()
            .rev()
            .find(|c| c.kind == COLLECTION_APPLICATION)
            .map(|c| (c.usage_page, c.usage))
    }

    /// Emit the fields of one Input/Output item.
    fn emit(&mut self, kind: ReportKind, data: u32) {
        let mut flags = FieldFlags::from_main(data);
        let global = self.global;
        let unit = global.report_size;
        let count = global.report_count;
        if unit == 0 || count == 0 {
            return;
        }
        if unit > MAX_FIELD_BITS && !flags.constant {
            // Unreadable by the extractor; keep the bits as padding.
            warn!(
                "Interface {} report {}: {}-bit data field treated as padding",
                self.reports.interface_id, global.report_id, unit
            );
            flags = FieldFlags::padding();
        }

        let application = self.application();
        let local = &self.local;
        let Some(map) = self.reports.map_mut(global.report_id, kind, application) else {
            return;
        };

        let template = FieldDescriptor {
            usage_page: global.usage_page,
            usage: 0,
            usage_maximum: 0,
            report_size: unit.min(u16::MAX as u32) as u16,
            report_count: 1,
            logical_min: global.logical_min,
            logical_max: global.logical_max,
            flags,
            bit_offset: 0,
            bit_size: 0,
        };
        let span = unit.saturating_mul(count);

        let emitted = if flags.constant {
            map.append(
                FieldDescriptor {
                    report_count: count.min(u16::MAX as u32) as u16,
                    logical_min: 0,
                    logical_max: 0,
                    flags: FieldFlags::padding(),
                    ..template
                },
                span,
            )
        } else if flags.array && local.has_usage_range {
            map.append(
                FieldDescriptor {
                    usage: local.usage_minimum,
                    usage_maximum: local.usage_maximum,
                    report_count: count.min(u16::MAX as u32) as u16,
                    ..template
                },
                span,
            )
        } else if local.has_usage_range {
            let n = count.min(local.range_len());
            let mut ok = true;
            for j in 0..n {
                let usage = local.usage_minimum.wrapping_add(j as u16);
                ok = map.append(
                    FieldDescriptor {
                        usage,
                        usage_maximum: usage,
                        ..template
                    },
                    unit,
                );
                if !ok {
                    break;
                }
            }
            if ok && n < count {
                map.skip((count - n).saturating_mul(unit));
            }
            ok
        } else {
            let mut ok = true;
            for j in 0..count as usize {
                let usage = local.usage_for(j);
                ok = map.append(
                    FieldDescriptor {
                        usage,
                        usage_maximum: usage,
                        ..template
                    },
                    unit,
                );
                if !ok {
                    break;
                }
            }
            ok
        };

        if !emitted {
            warn!(
                "Interface {} report {}: field table or 64-byte limit reached, item truncated",
                self.reports.interface_id, global.report_id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn items_decode_sizes_and_types() {
        let data = [0x05, 0x01, 0x26, 0xFF, 0x00, 0x27, 0x01, 0x02, 0x03, 0x04, 0xC0];
        let items: std::vec::Vec<Item> = Items::new(&data).collect();
        assert_eq!(items.len(), 4);
        assert_eq!(items[0].item_type, ItemType::Global);
        assert_eq!(items[0].data, 0x01);
        assert_eq!(items[1].size, 2);
        assert_eq!(items[1].data, 0x00FF);
        assert_eq!(items[2].size, 4);
        assert_eq!(items[2].data, 0x0403_0201);
        assert_eq!(items[3].item_type, ItemType::Main);
        assert_eq!(items[3].tag, MAIN_END_COLLECTION);
    }

    #[test]
    fn items_stop_at_truncated_item() {
        let data = [0x05, 0x01, 0x26, 0xFF];
        let items: std::vec::Vec<Item> = Items::new(&data).collect();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn items_skip_long_items() {
        let data = [0xFE, 0x02, 0x10, 0xAA, 0xBB, 0x05, 0x07];
        let items: std::vec::Vec<Item> = Items::new(&data).collect();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].data, 0x07);
    }

    #[test]
    fn signed_data_extends_from_item_width() {
        let item = |size, data| Item {
            item_type: ItemType::Global,
            tag: GLOBAL_LOGICAL_MINIMUM,
            size,
            data,
        };
        assert_eq!(item(1, 0x81).signed(), -127);
        assert_eq!(item(1, 0x7F).signed(), 127);
        assert_eq!(item(2, 0x8000).signed(), -32768);
        assert_eq!(item(2, 0x00FF).signed(), 255);
        assert_eq!(item(4, 0xFFFF_FFFF).signed(), -1);
        assert_eq!(item(0, 0).signed(), 0);
    }

    #[test]
    fn local_state_usage_fallbacks() {
        let mut local = LocalState::default();
        local.current_usage = 0x38;
        assert_eq!(local.usage_for(0), 0x38);

        local.usages.push(0x30).unwrap();
        local.usages.push(0x31).unwrap();
        local.current_usage = 0x31;
        assert_eq!(local.usage_for(0), 0x30);
        assert_eq!(local.usage_for(1), 0x31);
        assert_eq!(local.usage_for(2), 0x31);

        local.reset();
        assert!(local.usages.is_empty());
        assert_eq!(local.usage_for(0), 0x31);
    }

    #[test]
    fn collection_overflow_is_capped() {
        let mut data = std::vec::Vec::new();
        for _ in 0..(MAX_COLLECTION_DEPTH + 2) {
            data.extend_from_slice(&[0xA1, 0x00]);
        }
        for _ in 0..(MAX_COLLECTION_DEPTH + 4) {
            data.push(0xC0);
        }
        // Parses without panicking and yields no fields.
        let reports = InterfaceReports::parse(&data, 0);
        assert_eq!(reports.maps().count(), 0);
    }

    #[test]
    fn huge_report_size_does_not_overflow_cursor() {
        let data = [
            0x05, 0x01, 0x09, 0x30, 0x75, 0x08, 0x95, 0x01, 0x81, 0x02, // 8-bit X
            0x77, 0xFF, 0xFF, 0xFF, 0xFF, // Report Size (4294967295)
            0x95, 0x01, 0x09, 0x31, 0x81, 0x02, // Y
        ];
        let reports = InterfaceReports::parse(&data, 0);
        let map = reports.input(0).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!((map.fields()[0].bit_offset, map.fields()[0].bit_size), (0, 8));
        assert_eq!(map.total_bits(), 8);
    }

    #[test]
    fn wide_data_field_becomes_padding() {
        let data = [
            0x05, 0x01, 0x09, 0x30, 0x75, 0x28, 0x95, 0x01, 0x81, 0x02, // 40-bit X
            0x75, 0x08, 0x09, 0x31, 0x81, 0x02, // 8-bit Y
        ];
        let reports = InterfaceReports::parse(&data, 0);
        let map = reports.input(0).unwrap();
        assert_eq!(map.len(), 2);
        assert!(map.fields()[0].flags.constant);
        assert_eq!(map.fields()[0].bit_size, 40);
        assert_eq!(map.fields()[1].usage, 0x31);
        assert_eq!(map.fields()[1].bit_offset, 40);
        assert_eq!(map.total_bits(), 48);
    }

    #[test]
    fn split_report_only_strips_declared_ids() {
        let plain = InterfaceReports::parse(&[0x75, 0x08, 0x95, 0x01, 0x81, 0x02], 0);
        assert_eq!(plain.split_report(&[0x05, 0x06]), (0, &[0x05, 0x06][..]));

        let with_ids =
            InterfaceReports::parse(&[0x85, 0x03, 0x75, 0x08, 0x95, 0x01, 0x81, 0x02], 0);
        assert!(with_ids.uses_report_ids());
        assert_eq!(with_ids.split_report(&[0x03, 0x7F]), (3, &[0x7F][..]));
        assert_eq!(with_ids.split_report(&[]), (0, &[][..]));
    }
}
