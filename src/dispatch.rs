//! Report dispatcher - producer/consumer handoff of decoded reports.
//!
//! The USB side (producer) looks up the report map for the interface,
//! decodes every field and queues a fully owned [`DecodedReport`]. The
//! consumer task dequeues reports one at a time, in arrival order.
//!
//! Report maps live in a [`ReportTable`] behind a blocking mutex so the
//! descriptor parse (write) and field extraction (read) never overlap.
//! The queue is a fixed-depth `embassy_sync` channel; when it stays full
//! past the enqueue timeout the newest report is dropped.

use core::cell::RefCell;
use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::channel::Channel;
use embassy_time::{with_timeout, Duration};
use heapless::Vec;

use crate::config::{ENQUEUE_TIMEOUT_MS, MAX_INTERFACES, MAX_REPORT_BYTES, MAX_REPORT_FIELDS};
use crate::error::Error;
use crate::hid::{classify, extract_field, FieldDescriptor, InterfaceReports, MapLookup, MapSummary, ReportMap};

/// One field of a decoded report with its sign-extended value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DecodedField {
    pub field: FieldDescriptor,
    pub value: i32,
}

/// A decoded input report, self-contained so it can cross the queue by value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedReport {
    pub interface_id: u8,
    /// Report ID of the map the payload was decoded with (0 = none).
    pub report_id: u8,
    /// Generation of the interface's maps at decode time.
    pub generation: u32,
    pub fields: Vec<DecodedField, MAX_REPORT_FIELDS>,
    /// Payload bytes, report ID excluded.
    pub raw: Vec<u8, MAX_REPORT_BYTES>,
}

impl DecodedReport {
    /// Decode `payload` with every field of `map`.
    pub fn decode(
        map: &ReportMap,
        interface_id: u8,
        generation: u32,
        payload: &[u8],
    ) -> Result<Self, Error> {
        let raw = Vec::from_slice(payload).map_err(|_| Error::ReportTooLong)?;

        let mut fields = Vec::new();
        for field in map.fields() {
            let value = extract_field(payload, field.bit_offset, field.bit_size);
            // Same capacity as the map's field table.
            let _ = fields.push(DecodedField {
                field: *field,
                value,
            });
        }

        Ok(Self {
            interface_id,
            report_id: map.report_id(),
            generation,
            fields,
            raw,
        })
    }

    /// First field carrying `usage` on `usage_page`.
    pub fn find(&self, usage_page: u16, usage: u16) -> Option<&DecodedField> {
        self.fields
            .iter()
            .find(|d| d.field.usage_page == usage_page && d.field.covers(usage) && !d.field.flags.constant)
    }
}

struct TableEntry {
    generation: u32,
    reports: InterfaceReports,
}

/// Report maps of all connected interfaces, keyed by interface ID.
pub struct ReportTable {
    entries: Vec<TableEntry, MAX_INTERFACES>,
    next_generation: u32,
}

impl Default for ReportTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportTable {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_generation: 1,
        }
    }

    /// Store `reports`, replacing any maps held for the same interface.
    ///
    /// Returns the generation assigned to the new maps.
    pub fn insert(&mut self, reports: InterfaceReports) -> Result<u32, Error> {
        let generation = self.next_generation;
        let interface_id = reports.interface_id();

        match self
            .entries
            .iter_mut()
            .find(|e| e.reports.interface_id() == interface_id)
        {
            Some(entry) => {
                entry.generation = generation;
                entry.reports = reports;
            }
            None => {
                self.entries
                    .push(TableEntry {
                        generation,
                        reports,
                    })
                    .map_err(|_| Error::InterfaceTableFull)?;
            }
        }

        self.next_generation = self.next_generation.wrapping_add(1).max(1);
        Ok(generation)
    }

    /// Forget the maps of `interface_id`. Returns `false` if none were stored.
    pub fn remove(&mut self, interface_id: u8) -> bool {
        match self
            .entries
            .iter()
            .position(|e| e.reports.interface_id() == interface_id)
        {
            Some(index) => {
                self.entries.swap_remove(index);
                true
            }
            None => false,
        }
    }

    /// Maps and generation for `interface_id`.
    pub fn get(&self, interface_id: u8) -> Option<(u32, &InterfaceReports)> {
        self.entries
            .iter()
            .find(|e| e.reports.interface_id() == interface_id)
            .map(|e| (e.generation, &e.reports))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Snapshot of the dispatcher counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DispatchStats {
    /// Reports decoded and queued.
    pub decoded: u32,
    /// Reports dropped because the queue stayed full.
    pub dropped: u32,
    /// Reports for an unknown interface or report ID, or oversized.
    pub unknown: u32,
}

/// Producer/consumer handoff with `N` queue slots.
pub struct Dispatcher<const N: usize> {
    table: BlockingMutex<CriticalSectionRawMutex, RefCell<ReportTable>>,
    queue: Channel<CriticalSectionRawMutex, DecodedReport, N>,
    decoded: AtomicU32,
    dropped: AtomicU32,
    unknown: AtomicU32,
}

impl<const N: usize> Default for Dispatcher<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Dispatcher<N> {
    pub const fn new() -> Self {
        Self {
            table: BlockingMutex::new(RefCell::new(ReportTable::new())),
            queue: Channel::new(),
            decoded: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
            unknown: AtomicU32::new(0),
        }
    }

    /// Parse `descriptor` and install the maps for `interface_id`.
    ///
    /// The parse runs outside the lock; only the swap is exclusive.
    pub fn on_device_connected(&self, interface_id: u8, descriptor: &[u8]) -> Result<u32, Error> {
        let reports = InterfaceReports::parse(descriptor, interface_id);
        let generation = self.table.lock(|t| t.borrow_mut().insert(reports))?;
        info!(
            "USB HID interface {} connected (generation {})",
            interface_id, generation
        );
        Ok(generation)
    }

    /// Drop the maps of `interface_id`.
    pub fn on_device_disconnected(&self, interface_id: u8) -> bool {
        let removed = self.table.lock(|t| t.borrow_mut().remove(interface_id));
        if removed {
            info!("USB HID interface {} disconnected", interface_id);
        } else {
            debug!("Disconnect for unknown interface {}", interface_id);
        }
        removed
    }

    /// Decode a report payload against the current map.
    pub fn decode(&self, interface_id: u8, report_id: u8, payload: &[u8]) -> Result<DecodedReport, Error> {
        let result = self.table.lock(|t| {
            let table = t.borrow();
            let (generation, reports) = table.get(interface_id).ok_or(Error::UnknownInterface)?;
            let map = reports.input(report_id).ok_or(Error::UnknownReport)?;
            DecodedReport::decode(map, interface_id, generation, payload)
        });

        if let Err(e) = result {
            self.unknown.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Report {} on interface {} not decoded: {:?}",
                report_id, interface_id, e
            );
        }
        result
    }

    /// Decode and queue a report, waiting at most the enqueue timeout.
    pub async fn submit(&self, interface_id: u8, report_id: u8, payload: &[u8]) -> Result<(), Error> {
        let report = self.decode(interface_id, report_id, payload)?;
        let timeout = Duration::from_millis(ENQUEUE_TIMEOUT_MS);

        match with_timeout(timeout, self.queue.send(report)).await {
            Ok(()) => {
                self.decoded.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Report queue full, dropping report from interface {}", interface_id);
                Err(Error::QueueFull)
            }
        }
    }

    /// Like [`Dispatcher::submit`] but never waits.
    pub fn try_submit(&self, interface_id: u8, report_id: u8, payload: &[u8]) -> Result<(), Error> {
        let report = self.decode(interface_id, report_id, payload)?;

        match self.queue.try_send(report) {
            Ok(()) => {
                self.decoded.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(Error::QueueFull)
            }
        }
    }

    /// Queue a raw interrupt transfer, stripping the report ID byte when
    /// the interface declares report IDs.
    pub async fn submit_raw(&self, interface_id: u8, raw: &[u8]) -> Result<(), Error> {
        let Some((report_id, payload)) = self.split(interface_id, raw) else {
            self.unknown.fetch_add(1, Ordering::Relaxed);
            return Err(Error::UnknownInterface);
        };
        self.submit(interface_id, report_id, payload).await
    }

    fn split<'a>(&self, interface_id: u8, raw: &'a [u8]) -> Option<(u8, &'a [u8])> {
        self.table.lock(|t| {
            t.borrow()
                .get(interface_id)
                .map(|(_, reports)| reports.split_report(raw))
        })
    }

    /// Next queued report. Waits indefinitely.
    pub async fn receive(&self) -> DecodedReport {
        self.queue.receive().await
    }

    pub fn try_receive(&self) -> Option<DecodedReport> {
        self.queue.try_receive().ok()
    }

    /// Is any USB HID interface holding a report map?
    pub fn has_devices(&self) -> bool {
        self.table.lock(|t| !t.borrow().is_empty())
    }

    /// Run `f` with the maps of `interface_id`.
    pub fn with_reports<R>(&self, interface_id: u8, f: impl FnOnce(&InterfaceReports) -> R) -> Option<R> {
        self.table
            .lock(|t| t.borrow().get(interface_id).map(|(_, reports)| f(reports)))
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            decoded: self.decoded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
        }
    }
}

impl<const N: usize> MapLookup for Dispatcher<N> {
    fn generation(&self, interface_id: u8) -> Option<u32> {
        self.table
            .lock(|t| t.borrow().get(interface_id).map(|(generation, _)| generation))
    }

    fn summary(&self, interface_id: u8, report_id: u8) -> Option<MapSummary> {
        self.table.lock(|t| {
            let table = t.borrow();
            let (generation, reports) = table.get(interface_id)?;
            let map = reports.input(report_id)?;
            Some(MapSummary {
                generation,
                class: classify(map),
                field_count: map.len(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;

    /// Report ID 1: three 8-bit relative axes.
    const AXES: &[u8] = &[
        0x05, 0x01, 0x09, 0x02, 0xA1, 0x01, 0x85, 0x01, 0x09, 0x30, 0x09, 0x31, 0x09, 0x38, 0x15,
        0x81, 0x25, 0x7F, 0x75, 0x08, 0x95, 0x03, 0x81, 0x06, 0xC0,
    ];

    #[test]
    fn table_replaces_and_bumps_generation() {
        let mut table = ReportTable::new();
        let first = table.insert(InterfaceReports::parse(AXES, 0)).unwrap();
        let second = table.insert(InterfaceReports::parse(AXES, 0)).unwrap();
        assert_ne!(first, second);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(0).map(|(g, _)| g), Some(second));
        assert!(table.remove(0));
        assert!(!table.remove(0));
        assert!(table.is_empty());
    }

    #[test]
    fn table_rejects_extra_interfaces() {
        let mut table = ReportTable::new();
        for id in 0..MAX_INTERFACES as u8 {
            table.insert(InterfaceReports::parse(AXES, id)).unwrap();
        }
        assert_eq!(
            table.insert(InterfaceReports::parse(AXES, 9)),
            Err(Error::InterfaceTableFull)
        );
    }

    #[test]
    fn decode_fills_values_and_keeps_payload() {
        let dispatcher: Dispatcher<2> = Dispatcher::new();
        let generation = dispatcher.on_device_connected(3, AXES).unwrap();

        let report = dispatcher.decode(3, 1, &[0x05, 0xFB, 0x01]).unwrap();
        assert_eq!(report.interface_id, 3);
        assert_eq!(report.report_id, 1);
        assert_eq!(report.generation, generation);
        let values: std::vec::Vec<i32> = report.fields.iter().map(|d| d.value).collect();
        assert_eq!(values, [5, -5, 1]);
        assert_eq!(report.raw.as_slice(), &[0x05, 0xFB, 0x01]);
        assert_eq!(report.find(0x01, 0x31).map(|d| d.value), Some(-5));
    }

    #[test]
    fn decode_errors_are_counted() {
        let dispatcher: Dispatcher<2> = Dispatcher::new();
        assert_eq!(dispatcher.decode(0, 1, &[0]), Err(Error::UnknownInterface));

        dispatcher.on_device_connected(0, AXES).unwrap();
        assert_eq!(dispatcher.decode(0, 7, &[0]), Err(Error::UnknownReport));
        assert_eq!(dispatcher.decode(0, 1, &[0; 65]), Err(Error::ReportTooLong));
        assert_eq!(dispatcher.stats().unknown, 3);
    }

    #[test]
    fn submit_raw_strips_report_id() {
        let dispatcher: Dispatcher<2> = Dispatcher::new();
        dispatcher.on_device_connected(0, AXES).unwrap();

        block_on(dispatcher.submit_raw(0, &[0x01, 0x02, 0x03, 0x04])).unwrap();
        let report = dispatcher.try_receive().unwrap();
        assert_eq!(report.report_id, 1);
        assert_eq!(report.raw.as_slice(), &[0x02, 0x03, 0x04]);

        assert_eq!(
            block_on(dispatcher.submit_raw(5, &[0x01])),
            Err(Error::UnknownInterface)
        );
    }

    #[test]
    fn try_submit_drops_when_full() {
        let dispatcher: Dispatcher<1> = Dispatcher::new();
        dispatcher.on_device_connected(0, AXES).unwrap();
        assert_eq!(dispatcher.try_submit(0, 1, &[1, 0, 0]), Ok(()));
        assert_eq!(dispatcher.try_submit(0, 1, &[2, 0, 0]), Err(Error::QueueFull));
        assert_eq!(dispatcher.stats().dropped, 1);
        assert_eq!(dispatcher.try_receive().map(|r| r.raw[0]), Some(1));
        assert!(dispatcher.try_receive().is_none());
    }

    #[test]
    fn connectivity_follows_table() {
        let dispatcher: Dispatcher<1> = Dispatcher::new();
        assert!(!dispatcher.has_devices());
        dispatcher.on_device_connected(2, AXES).unwrap();
        assert!(dispatcher.has_devices());
        assert_eq!(dispatcher.with_reports(2, |r| r.uses_report_ids()), Some(true));
        assert!(dispatcher.on_device_disconnected(2));
        assert!(!dispatcher.has_devices());
    }

    #[test]
    fn summary_tracks_generation() {
        let dispatcher: Dispatcher<1> = Dispatcher::new();
        let generation = dispatcher.on_device_connected(0, AXES).unwrap();
        let summary = dispatcher.summary(0, 1).unwrap();
        assert_eq!(summary.generation, generation);
        assert_eq!(summary.field_count, 3);
        assert_eq!(dispatcher.generation(0), Some(generation));
        assert_eq!(dispatcher.summary(0, 2), None);
    }
}
